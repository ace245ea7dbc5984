use std::time;

use serde::{Deserialize, Serialize};

use super::constants::*;
use super::defaults::*;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Configuration {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogConfig {
    #[serde(default = "log_level")]
    pub level: Option<String>,

    #[serde(default)]
    pub filters: Option<Vec<LogFilter>>,

    #[serde(default)]
    pub file: Option<LogFile>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFilter {
    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFile {
    pub path: String,

    #[serde(default)]
    pub append: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub enum StorageConfig {
    #[serde(rename = "sqlite")]
    Sqlite(SqliteStorage),
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SqliteStorage {
    pub path: Option<String>,
}

/// Options read by provider selection and the response pipeline.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChatConfig {
    #[serde(default, alias = "selected_ai_model")]
    pub selected_model: Option<String>,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default)]
    pub anthropic_api_key: Option<String>,

    #[serde(default)]
    pub google_api_key: Option<String>,

    #[serde(default)]
    pub model_path: Option<String>,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub file_paths: Vec<String>,

    #[serde(default = "temperature")]
    pub temperature: f32,

    #[serde(default = "max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "openai_endpoint")]
    pub openai_endpoint: String,

    #[serde(default = "anthropic_endpoint")]
    pub anthropic_endpoint: String,

    #[serde(default = "google_endpoint")]
    pub google_endpoint: String,

    #[serde(default = "local_endpoint")]
    pub local_endpoint: String,
}

impl ChatConfig {
    pub fn selected_model(&self) -> &str {
        self.selected_model.as_deref().unwrap_or_default().trim()
    }

    pub fn openai_api_key(&self) -> Option<&str> {
        non_blank(self.openai_api_key.as_deref())
    }

    pub fn anthropic_api_key(&self) -> Option<&str> {
        non_blank(self.anthropic_api_key.as_deref())
    }

    pub fn google_api_key(&self) -> Option<&str> {
        non_blank(self.google_api_key.as_deref())
    }

    pub fn model_path(&self) -> Option<&str> {
        non_blank(self.model_path.as_deref())
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or_default()
    }

    pub fn timeout(&self) -> time::Duration {
        time::Duration::from_secs(self.timeout_secs)
    }

    pub fn with_selected_model(mut self, model: impl Into<String>) -> Self {
        self.selected_model = Some(model.into());
        self
    }

    pub fn with_openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    pub fn with_anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    pub fn with_google_api_key(mut self, key: impl Into<String>) -> Self {
        self.google_api_key = Some(key.into());
        self
    }

    pub fn with_model_path(mut self, path: impl Into<String>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_file_paths(mut self, paths: Vec<String>) -> Self {
        self.file_paths = paths;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Points every provider at the same base URL. Used against mock servers.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.openai_endpoint = endpoint.to_string();
        self.anthropic_endpoint = endpoint.to_string();
        self.google_endpoint = endpoint.to_string();
        self.local_endpoint = endpoint.to_string();
        self
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
            filters: None,
            file: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sqlite(SqliteStorage::default())
    }
}

impl SqliteStorage {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            selected_model: None,
            openai_api_key: None,
            anthropic_api_key: None,
            google_api_key: None,
            model_path: None,
            system_prompt: None,
            file_paths: vec![],
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            openai_endpoint: OPENAI_ENDPOINT.to_string(),
            anthropic_endpoint: ANTHROPIC_ENDPOINT.to_string(),
            google_endpoint: GOOGLE_ENDPOINT.to_string(),
            local_endpoint: LOCAL_ENDPOINT.to_string(),
        }
    }
}
