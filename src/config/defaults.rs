use super::constants::*;

pub(crate) fn log_level() -> Option<String> {
    Some("info".to_string())
}

pub(crate) fn temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

pub(crate) fn max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

pub(crate) fn timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

pub(crate) fn openai_endpoint() -> String {
    OPENAI_ENDPOINT.to_string()
}

pub(crate) fn anthropic_endpoint() -> String {
    ANTHROPIC_ENDPOINT.to_string()
}

pub(crate) fn google_endpoint() -> String {
    GOOGLE_ENDPOINT.to_string()
}

pub(crate) fn local_endpoint() -> String {
    LOCAL_ENDPOINT.to_string()
}
