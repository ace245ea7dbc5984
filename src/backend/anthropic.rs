#[cfg(test)]
#[path = "anthropic_test.rs"]
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

pub struct Anthropic {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: time::Duration,
    temperature: f32,
    max_tokens: usize,
}

#[async_trait]
impl Backend for Anthropic {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
            .json::<MessagesResponse>()
            .await
            .map_err(ProviderError::from)?;

        let text = res
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<String>();
        Ok(text)
    }

    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream> {
        let req = self.request(prompt, true)?;
        let res = send(req, self.timeout).await?;
        Ok(fragment_stream(res, self.timeout, StreamEnd::Marker, parse_line))
    }
}

impl Anthropic {
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

        // The system entry travels outside the message list.
        let mut system = None;
        let mut messages = vec![];
        for msg in prompt.messages() {
            match msg.role {
                ChatRole::System => system = Some(msg.content),
                role => messages.push(MessageRequest {
                    role,
                    content: msg.content,
                }),
            }
        }

        let messages_req = MessagesRequest {
            model: self.model.clone(),
            system,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        };
        log::trace!("Sending messages request: {:?}", messages_req);

        Ok(post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&messages_req))
    }
}

fn parse_line(line: &str) -> Line {
    let Some(data) = sse_data(line) else {
        return Line::Skip;
    };

    let event = match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => event,
        Err(err) => {
            return Line::Error(ProviderError::unknown(format!(
                "parsing stream event: {}",
                err
            )));
        }
    };

    match event.event_type.as_str() {
        "content_block_delta" => match event.delta.and_then(|d| d.text) {
            Some(text) if !text.is_empty() => Line::Fragment(text),
            _ => Line::Skip,
        },
        "message_stop" => Line::Done,
        "error" => {
            let message = event
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "stream error".to_string());
            Line::Error(ProviderError::unknown(message))
        }
        _ => Line::Skip,
    }
}

impl Default for Anthropic {
    fn default() -> Self {
        Self {
            endpoint: ANTHROPIC_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            timeout: time::Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl From<&ChatConfig> for Anthropic {
    fn from(value: &ChatConfig) -> Self {
        Self {
            endpoint: value.anthropic_endpoint.clone(),
            api_key: value.anthropic_api_key().map(str::to_string),
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
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
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessageRequest>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    error: Option<ErrorBody>,
}
