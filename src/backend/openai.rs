#[cfg(test)]
#[path = "openai_test.rs"]
mod tests;

use std::time;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{
        Backend, FragmentStream,
        utils::{Line, StreamEnd, fragment_stream, post, send, sse_data},
    },
    config::{ChatConfig, constants::*},
    context::{ChatRole, Prompt},
    error::{Error, ProviderError, Result},
    models::ProviderKind,
};

pub struct OpenAI {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: time::Duration,
    temperature: f32,
    max_tokens: usize,
}

#[async_trait]
impl Backend for OpenAI {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let req = self.request(prompt, false)?;
        let res = send(req.timeout(self.timeout), self.timeout).await?;

        let res = res
            .json::<CompletionResponse>()
            .await
            .map_err(ProviderError::from)?;

        let text = res
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        Ok(text)
    }

    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream> {
        let req = self.request(prompt, true)?;
        let res = send(req, self.timeout).await?;
        Ok(fragment_stream(res, self.timeout, StreamEnd::Marker, parse_line))
    }
}

impl OpenAI {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, prompt: &Prompt, stream: bool) -> Result<reqwest::RequestBuilder> {
        let api_key = self.api_key.as_deref().ok_or(Error::NotConfigured)?;

        let completion_req = CompletionRequest {
            model: self.model.clone(),
            messages: prompt
                .messages()
                .into_iter()
                .map(|m| MessageRequest {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            stream,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        log::trace!("Sending completion request: {:?}", completion_req);

        Ok(post(format!("{}/v1/chat/completions", self.endpoint))
            .bearer_auth(api_key)
            .json(&completion_req))
    }
}

fn parse_line(line: &str) -> Line {
    let Some(data) = sse_data(line) else {
        return Line::Skip;
    };
    if data == "[DONE]" {
        return Line::Done;
    }

    let data = match serde_json::from_str::<CompletionResponse>(data) {
        Ok(data) => data,
        Err(err) => {
            return Line::Error(ProviderError::unknown(format!(
                "parsing completion response line: {}",
                err
            )));
        }
    };

    if let Some(err) = data.error {
        return Line::Error(ProviderError::unknown(err.message));
    }

    let Some(choice) = data.choices.into_iter().next() else {
        return Line::Skip;
    };
    match choice.delta.and_then(|d| d.content) {
        Some(text) if !text.is_empty() => Line::Fragment(text),
        _ => Line::Skip,
    }
}

impl Default for OpenAI {
    fn default() -> Self {
        Self {
            endpoint: OPENAI_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            timeout: time::Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl From<&ChatConfig> for OpenAI {
    fn from(value: &ChatConfig) -> Self {
        Self {
            endpoint: value.openai_endpoint.clone(),
            api_key: value.openai_api_key().map(str::to_string),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            timeout: value.timeout(),
            temperature: value.temperature,
            max_tokens: value.max_tokens,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageRequest {
    role: ChatRole,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<MessageRequest>,
    stream: bool,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionChoiceResponse {
    #[serde(default)]
    message: Option<MessageResponse>,
    #[serde(default)]
    delta: Option<MessageResponse>,
    finish_reason: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoiceResponse>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}
