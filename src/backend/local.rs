#[cfg(test)]
#[path = "local_test.rs"]
mod tests;

use std::time;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{
    backend::{
        Backend, FragmentStream,
        utils::{Line, StreamEnd, client, fragment_stream, post, send},
    },
    config::{ChatConfig, constants::*, user_agent},
    context::Prompt,
    error::{ProviderError, Result},
    models::ProviderKind,
};

/// Local inference through an Ollama compatible server.
pub struct Local {
    endpoint: String,
    model: String,
    timeout: time::Duration,
    temperature: f32,
    max_tokens: usize,

    ready: OnceCell<Result<(), ProviderError>>,
}

#[async_trait]
impl Backend for Local {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    /// Checks that the model is served. Runs once; concurrent callers wait
    /// for the first attempt and share its outcome.
    async fn initialize(&self) -> Result<()> {
        let ready = self
            .ready
            .get_or_init(|| async {
                log::info!("Initializing local model {}", self.model);
                let res = self.ensure_model().await;
                if let Err(err) = &res {
                    log::warn!("Local model {} is unavailable: {}", self.model, err);
                }
                res
            })
            .await;
        ready.clone().map_err(Into::into)
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.initialize().await?;

        let req = self.request(prompt, false);
        let res = send(req.timeout(self.timeout), self.timeout).await?;
        let res = res
            .json::<GenerateResponse>()
            .await
            .map_err(ProviderError::from)?;

        if let Some(err) = res.error {
            return Err(ProviderError::unknown(err).into());
        }
        Ok(res.response)
    }

    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream> {
        self.initialize().await?;

        let req = self.request(prompt, true);
        let res = send(req, self.timeout).await?;
        Ok(fragment_stream(res, self.timeout, StreamEnd::Eof, parse_line))
    }
}

impl Local {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
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

    /// Models reported by the server.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let req = client()
            .get(format!("{}/api/tags", self.endpoint))
            .header("User-Agent", user_agent())
            .timeout(self.timeout);
        let res = send(req, self.timeout).await?;

        let res = res.json::<TagsResponse>().await?;
        let mut models = res.models.into_iter().map(|m| m.name).collect::<Vec<_>>();
        models.sort();
        Ok(models)
    }

    async fn ensure_model(&self) -> Result<(), ProviderError> {
        if self.model.is_empty() {
            return Err(ProviderError::unknown("no local model configured"));
        }

        let models = self.list_models().await?;
        let found = models.iter().any(|name| {
            name == &self.model || name.strip_suffix(":latest") == Some(self.model.as_str())
        });
        if !found {
            return Err(ProviderError::unknown(format!(
                "model {} is not available at {}",
                self.model, self.endpoint
            )));
        }
        Ok(())
    }

    fn request(&self, prompt: &Prompt, stream: bool) -> reqwest::RequestBuilder {
        let generate_req = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_text(),
            stream,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };
        log::trace!("Sending generate request: {:?}", generate_req);

        post(format!("{}/api/generate", self.endpoint)).json(&generate_req)
    }
}

fn parse_line(line: &str) -> Line {
    if line.is_empty() {
        return Line::Skip;
    }

    let chunk = match serde_json::from_str::<GenerateResponse>(line) {
        Ok(chunk) => chunk,
        Err(err) => {
            return Line::Error(ProviderError::unknown(format!(
                "parsing generate response line: {}",
                err
            )));
        }
    };

    if let Some(err) = chunk.error {
        return Line::Error(ProviderError::unknown(err));
    }
    if !chunk.response.is_empty() {
        return Line::Fragment(chunk.response);
    }
    if chunk.done {
        return Line::Done;
    }
    Line::Skip
}

impl Default for Local {
    fn default() -> Self {
        Self {
            endpoint: LOCAL_ENDPOINT.to_string(),
            model: String::new(),
            timeout: time::Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            ready: OnceCell::new(),
        }
    }
}

impl From<&ChatConfig> for Local {
    fn from(value: &ChatConfig) -> Self {
        Self {
            endpoint: value.local_endpoint.clone(),
            model: value.model_path().unwrap_or_default().to_string(),
            timeout: value.timeout(),
            temperature: value.temperature,
            max_tokens: value.max_tokens,
            ready: OnceCell::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}
