#[cfg(test)]
#[path = "gemini_test.rs"]
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
    context::{ChatMessage, ChatRole, Prompt},
    error::{Error, ProviderError, Result},
    models::ProviderKind,
};

pub struct Gemini {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: time::Duration,
    temperature: f32,
    max_tokens: usize,
}

#[async_trait]
impl Backend for Gemini {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let req = self.request(prompt, "generateContent", &[])?;
        let res = send(req.timeout(self.timeout), self.timeout).await?;

        let res = res
            .json::<GenerateContentResponse>()
            .await
            .map_err(ProviderError::from)?;
        Ok(res.text())
    }

    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream> {
        let req = self.request(prompt, "streamGenerateContent", &[("alt", "sse")])?;
        let res = send(req, self.timeout).await?;
        Ok(fragment_stream(res, self.timeout, StreamEnd::Eof, parse_line))
    }
}

impl Gemini {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = format_model(model);
        self
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(
        &self,
        prompt: &Prompt,
        method: &str,
        extra_params: &[(&str, &str)],
    ) -> Result<reqwest::RequestBuilder> {
        let api_key = self.api_key.as_deref().ok_or(Error::NotConfigured)?;

        let mut params = extra_params.to_vec();
        params.push(("key", api_key));
        let url = reqwest::Url::parse_with_params(
            &format!("{}/models/{}:{}", self.endpoint, self.model, method),
            params.as_slice(),
        )
        .map_err(|e| ProviderError::unknown(format!("parsing url: {}", e)))?;

        let mut system_instruction = None;
        let mut contents = vec![];
        for msg in prompt.messages() {
            match msg.role {
                ChatRole::System => {
                    system_instruction = Some(Content {
                        role: None,
                        parts: vec![Part::text(msg.content)],
                    })
                }
                _ => contents.push(Content::from(msg)),
            }
        }

        let completion_req = CompletionRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };
        log::trace!("Sending completion request: {:?}", completion_req);

        Ok(post(url).json(&completion_req))
    }
}

fn parse_line(line: &str) -> Line {
    let Some(data) = sse_data(line) else {
        return Line::Skip;
    };

    let content = match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(content) => content,
        Err(err) => {
            return Line::Error(ProviderError::unknown(format!(
                "unmarshalling response: {}",
                err
            )));
        }
    };

    if let Some(err) = content.error {
        return Line::Error(ProviderError::unknown(err.message));
    }

    let text = content.text();
    if text.is_empty() {
        return Line::Skip;
    }
    Line::Fragment(text)
}

/// Accepts both `gemini-pro` and `models/gemini-pro`.
fn format_model(model: &str) -> String {
    let model = model.strip_prefix("model/").unwrap_or(model);
    model.strip_prefix("models/").unwrap_or(model).to_string()
}

impl Default for Gemini {
    fn default() -> Self {
        Self {
            endpoint: GOOGLE_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_GOOGLE_MODEL.to_string(),
            timeout: time::Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl From<&ChatConfig> for Gemini {
    fn from(value: &ChatConfig) -> Self {
        Self {
            endpoint: value.google_endpoint.clone(),
            api_key: value.google_api_key().map(str::to_string),
            model: DEFAULT_GOOGLE_MODEL.to_string(),
            timeout: value.timeout(),
            temperature: value.temperature,
            max_tokens: value.max_tokens,
        }
    }
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl Part {
    fn text(text: String) -> Self {
        Self { text: Some(text) }
    }
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl From<ChatMessage> for Content {
    fn from(value: ChatMessage) -> Self {
        let role = match value.role {
            ChatRole::Assistant => "model",
            _ => "user",
        };
        Content {
            role: Some(role.to_string()),
            parts: vec![Part::text(value.content)],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateCandidate {
    #[serde(default)]
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}
