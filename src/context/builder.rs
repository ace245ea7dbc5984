#[cfg(test)]
#[path = "builder_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use crate::{
    config::ChatConfig,
    models::{Message, Role},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(value: Role) -> Self {
        match value {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        }
    }
}

/// One entry of the structured context sent to role-aware providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A reference file injected into the context, labeled by its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    path: String,
    content: String,
}

impl Reference {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    fn render(&self) -> String {
        format!("File: {}\n{}", self.path, self.content)
    }
}

/// The full context of one turn, in send order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    system: String,
    references: Vec<Reference>,
    history: Vec<Message>,
    user: String,
}

impl Prompt {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// System prompt followed by the reference files. This is the leading
    /// system entry of the structured form.
    pub fn instructions(&self) -> String {
        let mut sections = vec![];
        if !self.system.trim().is_empty() {
            sections.push(self.system.clone());
        }
        sections.extend(self.references.iter().map(Reference::render));
        sections.join("\n\n")
    }

    /// Flat form for providers that take a single text prompt.
    pub fn to_text(&self) -> String {
        let mut sections = vec![];
        let instructions = self.instructions();
        if !instructions.is_empty() {
            sections.push(instructions);
        }

        if !self.history.is_empty() {
            let mut previous = String::from("Previous conversation:");
            for msg in &self.history {
                previous.push('\n');
                previous.push_str(&format!("{}: {}", msg.role().label(), msg.content()));
            }
            sections.push(previous);
        }

        sections.push(format!("{}: {}", Role::User.label(), self.user));
        sections.join("\n\n")
    }

    /// Structured form: an optional system entry, the history 1:1 and the
    /// new user turn last.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        let instructions = self.instructions();
        if !instructions.is_empty() {
            messages.push(ChatMessage::new(ChatRole::System, instructions));
        }
        messages.extend(
            self.history
                .iter()
                .map(|m| ChatMessage::new(m.role().into(), m.content())),
        );
        messages.push(ChatMessage::new(ChatRole::User, self.user.clone()));
        messages
    }
}

pub struct ContextBuilder {
    system_prompt: String,
    file_paths: Vec<String>,
}

impl ContextBuilder {
    pub fn new(system_prompt: impl Into<String>, file_paths: Vec<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            file_paths,
        }
    }

    /// Builds the context for `current` from the messages that precede it
    /// in `history`. Anything appended after `current` is left out. Nothing
    /// is truncated.
    pub async fn build(&self, history: &[Message], current: &Message) -> Prompt {
        let previous = history
            .iter()
            .take_while(|m| m.id() != current.id())
            .cloned()
            .collect::<Vec<_>>();

        Prompt::new(current.content())
            .with_system(self.system_prompt.clone())
            .with_references(self.read_references().await)
            .with_history(previous)
    }

    async fn read_references(&self) -> Vec<Reference> {
        let mut references = Vec::with_capacity(self.file_paths.len());
        for path in &self.file_paths {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => references.push(Reference::new(path, content)),
                Err(err) => log::warn!("Skipping reference file {}: {}", path, err),
            }
        }
        references
    }
}

impl From<&ChatConfig> for ContextBuilder {
    fn from(value: &ChatConfig) -> Self {
        Self::new(value.system_prompt(), value.file_paths.clone())
    }
}
