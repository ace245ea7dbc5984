use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::config::constants::TITLE_TIME_FORMAT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: String,
    title: String,
    provider: String,
    model: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: default_title(now),
            provider: String::new(),
            model: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_created_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.created_at = timestamp;
        if self.updated_at < timestamp {
            self.updated_at = timestamp;
        }
        self
    }

    pub fn with_updated_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.updated_at = timestamp;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Title given to conversations created without one, e.g. `Chat 2024-05-01 13:37`.
pub fn default_title(created_at: DateTime<Utc>) -> String {
    format!(
        "Chat {}",
        created_at.with_timezone(&Local).format(TITLE_TIME_FORMAT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conversation_defaults() {
        let convo = Conversation::new("abc");
        assert_eq!(convo.id(), "abc");
        assert!(convo.title().starts_with("Chat "));
        assert_eq!(convo.title().len(), "Chat 2024-05-01 13:37".len());
        assert_eq!(convo.created_at(), convo.updated_at());
        assert!(convo.provider().is_empty());
    }

    #[test]
    fn test_with_created_at_keeps_updated_at_monotonic() {
        let later = Utc::now() + chrono::Duration::seconds(10);
        let convo = Conversation::new("abc").with_created_at(later);
        assert_eq!(convo.updated_at(), later);
    }
}
