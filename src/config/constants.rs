/// Model used when only an OpenAI credential is configured
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-haiku-20240307";

pub const DEFAULT_GOOGLE_MODEL: &str = "gemini-pro";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

pub const DEFAULT_MAX_TOKENS: usize = 1000;

/// Bounded wait for a single provider call
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com";

pub const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com";

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const GOOGLE_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const LOCAL_ENDPOINT: &str = "http://localhost:11434";

pub const NOT_CONFIGURED_MESSAGE: &str =
    "AI model not configured. Please configure it in the AI Chat settings.";

pub const FAILURE_PREFIX: &str = "Error getting AI response";

pub const STREAM_INTERRUPTED_MARKER: &str = "[interrupted]";

pub const TITLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
