use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

#[derive(Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, Debug, Clone, Copy)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "none")]
    None,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Local => "local",
            ProviderKind::None => "none",
        }
    }

    /// Parses the explicit `provider:` prefix of a model identifier.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "openai" => Some(ProviderKind::OpenAI),
            "anthropic" => Some(ProviderKind::Anthropic),
            "google" => Some(ProviderKind::Google),
            "local" => Some(ProviderKind::Local),
            _ => None,
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credential-free summary of the active configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub selected_model: String,
    pub current_provider: ProviderKind,
    pub current_model: String,
    pub has_openai_key: bool,
    pub has_anthropic_key: bool,
    pub has_google_key: bool,
    pub has_model_path: bool,
}

/// Models known for each provider, keyed by provider name.
pub type ModelCatalog = BTreeMap<ProviderKind, Vec<String>>;
