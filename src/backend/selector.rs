#[cfg(test)]
#[path = "selector_test.rs"]
mod tests;

use crate::{
    config::{
        ChatConfig,
        constants::{DEFAULT_ANTHROPIC_MODEL, DEFAULT_GOOGLE_MODEL, DEFAULT_OPENAI_MODEL},
    },
    models::ProviderKind,
};

/// The single backend chosen for a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    kind: ProviderKind,
    model: String,
}

impl Selection {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
        }
    }

    pub fn none() -> Self {
        Self::new(ProviderKind::None, "")
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Maps configuration to exactly one backend. First match wins:
/// explicit prefix, model keyword, local model path, OpenAI default.
pub fn select(config: &ChatConfig) -> Selection {
    let selected = config.selected_model();

    if let Some((prefix, model)) = selected.split_once(':') {
        if let Some(kind) = ProviderKind::from_prefix(&prefix.trim().to_lowercase()) {
            if let Some(selection) = explicit(config, kind, model.trim()) {
                return selection;
            }
            return fallback(config);
        }
    }

    if let Some(selection) = by_keyword(config, selected) {
        return selection;
    }

    fallback(config)
}

fn explicit(config: &ChatConfig, kind: ProviderKind, model: &str) -> Option<Selection> {
    let model = match kind {
        ProviderKind::Local => {
            let model = if model.is_empty() {
                config.model_path()?
            } else {
                model
            };
            return Some(Selection::new(kind, model));
        }
        _ if !has_credential(config, kind) => return None,
        _ if model.is_empty() => default_model(kind),
        _ => model,
    };
    Some(Selection::new(kind, model))
}

fn by_keyword(config: &ChatConfig, selected: &str) -> Option<Selection> {
    let lowered = selected.to_lowercase();
    let kind = [
        ("gpt", ProviderKind::OpenAI),
        ("claude", ProviderKind::Anthropic),
        ("gemini", ProviderKind::Google),
    ]
    .into_iter()
    .find(|(keyword, _)| lowered.contains(keyword))
    .map(|(_, kind)| kind)?;

    if !has_credential(config, kind) {
        return None;
    }
    Some(Selection::new(kind, selected))
}

fn fallback(config: &ChatConfig) -> Selection {
    if let Some(path) = config.model_path() {
        return Selection::new(ProviderKind::Local, path);
    }
    if config.openai_api_key().is_some() {
        return Selection::new(ProviderKind::OpenAI, DEFAULT_OPENAI_MODEL);
    }
    Selection::none()
}

fn has_credential(config: &ChatConfig, kind: ProviderKind) -> bool {
    match kind {
        ProviderKind::OpenAI => config.openai_api_key().is_some(),
        ProviderKind::Anthropic => config.anthropic_api_key().is_some(),
        ProviderKind::Google => config.google_api_key().is_some(),
        ProviderKind::Local => config.model_path().is_some(),
        ProviderKind::None => false,
    }
}

fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => DEFAULT_ANTHROPIC_MODEL,
        ProviderKind::Google => DEFAULT_GOOGLE_MODEL,
        _ => DEFAULT_OPENAI_MODEL,
    }
}
