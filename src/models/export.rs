#[cfg(test)]
#[path = "export_test.rs"]
mod tests;

use std::{fmt::Write, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::{Conversation, Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Structured,
    Plain,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "structured" | "json" => Ok(ExportFormat::Structured),
            "plain" | "txt" | "text" => Ok(ExportFormat::Plain),
            other => Err(Error::InvalidInput(format!(
                "unsupported export format {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationExport {
    pub conversation_id: String,
    pub title: String,
    pub provider: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ExportedMessage>,
}

impl ConversationExport {
    pub fn new(conversation: &Conversation, messages: &[Message]) -> Self {
        Self {
            conversation_id: conversation.id().to_string(),
            title: conversation.title().to_string(),
            provider: conversation.provider().to_string(),
            model: conversation.model().to_string(),
            created_at: conversation.created_at(),
            updated_at: conversation.updated_at(),
            messages: messages
                .iter()
                .map(|m| ExportedMessage {
                    role: m.role(),
                    content: m.content().to_string(),
                    timestamp: m.timestamp(),
                })
                .collect(),
        }
    }

    pub fn render(&self, format: ExportFormat) -> Result<String, Error> {
        match format {
            ExportFormat::Structured => Ok(serde_json::to_string_pretty(self)?),
            ExportFormat::Plain => Ok(self.render_plain()),
        }
    }

    pub fn parse(structured: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(structured)?)
    }

    fn render_plain(&self) -> String {
        let mut out = String::new();
        // Writing into a String never fails.
        let _ = writeln!(out, "Conversation: {}", self.title);
        let _ = writeln!(out, "Provider: {} | Model: {}", self.provider, self.model);
        let _ = writeln!(out, "Created: {}", format_time(self.created_at));
        let _ = writeln!(out, "{}", "=".repeat(50));
        out.push('\n');

        for msg in &self.messages {
            let _ = writeln!(out, "{}: {}", msg.role.as_str().to_uppercase(), msg.content);
            let _ = writeln!(out, "Time: {}", format_time(msg.timestamp));
            out.push('\n');
        }
        out
    }
}

fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}
