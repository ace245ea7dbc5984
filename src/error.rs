use std::fmt::Display;

use thiserror::Error;

use crate::pipeline::TurnState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("AI model not configured")]
    NotConfigured,

    #[error("conversation {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("turn task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid turn transition from {0} to {1}")]
    InvalidTransition(TurnState, TurnState),
}

impl Error {
    /// Errors that are turned into conversation content instead of being
    /// returned to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotConfigured | Error::Provider(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    InvalidCredential,
    ContextTooLong,
    Unknown,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unknown, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Classifies a non-success HTTP response from a provider.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = match status {
            401 | 403 => ProviderErrorKind::InvalidCredential,
            429 => ProviderErrorKind::RateLimited,
            408 | 504 => ProviderErrorKind::Timeout,
            400 | 413 if mentions_context_length(&message) => ProviderErrorKind::ContextTooLong,
            _ => ProviderErrorKind::Unknown,
        };
        Self::new(kind, message).with_status(status)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Unknown
        };
        let mut ret = Self::new(kind, err.to_string());
        if let Some(status) = err.status() {
            ret.status = Some(status.as_u16());
        }
        ret
    }
}

impl Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::RateLimited => write!(f, "rate limited"),
            ProviderErrorKind::InvalidCredential => write!(f, "invalid credential"),
            ProviderErrorKind::ContextTooLong => write!(f, "context too long"),
            ProviderErrorKind::Unknown => write!(f, "provider error"),
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

fn mentions_context_length(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "context_length",
        "context length",
        "context window",
        "maximum context",
        "too many tokens",
        "prompt is too long",
        "exceeds the maximum",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}
