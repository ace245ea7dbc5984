#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;

pub mod stream;
pub mod turn;

pub use stream::{TurnEvent, TurnStream};
pub use turn::{Turn, TurnState};

use std::sync::Arc;

use crate::{
    backend::{self, ArcBackend, Unavailable, catalog, select},
    config::{
        ChatConfig,
        constants::{FAILURE_PREFIX, NOT_CONFIGURED_MESSAGE},
    },
    context::{ContextBuilder, Prompt},
    error::{Error, ProviderError, Result},
    models::{
        Conversation, ExportFormat, Message, ModelCatalog, ProviderKind, ProviderStatus, Role,
    },
    storage::ArcStorage,
};

/// One user message to send.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    message: String,
    conversation_id: Option<String>,
    stream: bool,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn stream(&self) -> bool {
        self.stream
    }
}

/// Result of a synchronous turn. `failed` is set when `message` carries
/// failure text instead of a provider reply.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResponse {
    pub conversation_id: String,
    pub message: Message,
    pub failed: bool,
}

impl TurnResponse {
    pub fn response(&self) -> &str {
        self.message.content()
    }
}

struct PreparedTurn {
    turn: Turn,
    prompt: Prompt,
}

pub enum TurnReply {
    Complete(TurnResponse),
    Stream(TurnStream),
}

/// Runs turns against the backend selected at construction. Reconfiguring
/// means building a new pipeline.
pub struct ResponsePipeline {
    config: ChatConfig,
    storage: ArcStorage,
    backend: ArcBackend,
    context: ContextBuilder,
}

impl ResponsePipeline {
    pub async fn new(config: ChatConfig, storage: ArcStorage) -> Self {
        let selection = select(&config);
        log::info!(
            "Selected provider {} with model {}",
            selection.kind(),
            selection.model()
        );
        let backend = backend::new_backend(&selection, &config);
        Self::with_backend(config, storage, backend).await
    }

    /// Uses `backend` as is. A backend that fails to initialize is replaced
    /// by [`Unavailable`] for the lifetime of the pipeline.
    pub async fn with_backend(config: ChatConfig, storage: ArcStorage, backend: ArcBackend) -> Self {
        let backend = match backend.initialize().await {
            Ok(()) => backend,
            Err(err) => {
                log::warn!(
                    "Failed to initialize {} backend, no provider is active: {}",
                    backend.kind(),
                    err
                );
                Arc::new(Unavailable)
            }
        };

        Self {
            context: ContextBuilder::from(&config),
            config,
            storage,
            backend,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.backend.kind()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub async fn send_turn(&self, req: TurnRequest) -> Result<TurnReply> {
        let prepared = self.prepare(&req).await?;
        if req.stream {
            return Ok(TurnReply::Stream(self.stream_turn(prepared).await?));
        }
        Ok(TurnReply::Complete(self.complete_turn(prepared).await?))
    }

    /// Single synchronous turn in a fresh conversation, returning only the
    /// reply text.
    pub async fn chat(&self, message: &str) -> Result<String> {
        let prepared = self.prepare(&TurnRequest::new(message)).await?;
        let res = self.complete_turn(prepared).await?;
        Ok(res.message.content().to_string())
    }

    /// Resolves the conversation, persists the user message and builds the
    /// context.
    async fn prepare(&self, req: &TurnRequest) -> Result<PreparedTurn> {
        if req.message.trim().is_empty() {
            return Err(Error::InvalidInput("message is required".to_string()));
        }

        let mut turn = Turn::new();
        let conversation = match req.conversation_id() {
            Some(id) => self.storage.get_conversation(id).await?,
            None => self.create_conversation(None).await?,
        };
        turn.resolve(conversation.id())?;

        let user_message = self
            .storage
            .append_message(conversation.id(), Role::User, &req.message)
            .await?;
        turn.advance(TurnState::UserTurnPersisted)?;

        let history = self.storage.history(conversation.id()).await?;
        let prompt = self.context.build(&history, &user_message).await;
        turn.advance(TurnState::ContextBuilt)?;

        Ok(PreparedTurn { turn, prompt })
    }

    async fn complete_turn(&self, prepared: PreparedTurn) -> Result<TurnResponse> {
        let PreparedTurn { mut turn, prompt } = prepared;

        turn.advance(TurnState::Dispatched)?;
        let timeout = self.config.timeout();
        let reply = match tokio::time::timeout(timeout, self.backend.complete(&prompt)).await {
            Ok(reply) => reply,
            Err(_) => Err(ProviderError::timeout(format!("no response after {:?}", timeout)).into()),
        };

        let (message, failed) = match reply {
            Ok(text) => {
                let message = self
                    .storage
                    .append_message(turn.conversation_id(), Role::Assistant, &text)
                    .await?;
                turn.advance(TurnState::Completed)?;
                (message, false)
            }
            Err(err) => (self.fail(&mut turn, err).await?, true),
        };

        Ok(TurnResponse {
            conversation_id: turn.conversation_id().to_string(),
            message,
            failed,
        })
    }

    async fn stream_turn(&self, prepared: PreparedTurn) -> Result<TurnStream> {
        let PreparedTurn { mut turn, prompt } = prepared;

        turn.advance(TurnState::Dispatched)?;
        let fragments = match self.backend.stream(&prompt).await {
            Ok(fragments) => fragments,
            Err(err) => {
                let message = self.fail(&mut turn, err).await?;
                return Ok(TurnStream::failed(message));
            }
        };
        Ok(TurnStream::spawn(turn, fragments, self.storage.clone()))
    }

    pub async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation> {
        self.storage
            .create_conversation(title, self.provider().as_str(), self.model())
            .await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.storage.list_conversations().await
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.storage.history(conversation_id).await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.storage.delete_conversation(conversation_id).await
    }

    pub async fn export_conversation(
        &self,
        conversation_id: &str,
        format: ExportFormat,
    ) -> Result<String> {
        self.storage
            .export_conversation(conversation_id, format)
            .await
    }

    pub async fn available_models(&self) -> ModelCatalog {
        catalog::available_models(&self.config).await
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            selected_model: self.config.selected_model().to_string(),
            current_provider: self.provider(),
            current_model: self.model().to_string(),
            has_openai_key: self.config.openai_api_key().is_some(),
            has_anthropic_key: self.config.anthropic_api_key().is_some(),
            has_google_key: self.config.google_api_key().is_some(),
            has_model_path: self.config.model_path().is_some(),
        }
    }

    /// Records a recoverable failure as the assistant turn. Anything else is
    /// returned to the caller.
    async fn fail(&self, turn: &mut Turn, err: Error) -> Result<Message> {
        if !err.is_recoverable() {
            return Err(err);
        }
        log::warn!(
            "Turn in conversation {} failed: {}",
            turn.conversation_id(),
            err
        );

        let message = self
            .storage
            .append_message(turn.conversation_id(), Role::Assistant, &failure_text(&err))
            .await?;
        turn.advance(TurnState::Failed)?;
        Ok(message)
    }
}

fn failure_text(err: &Error) -> String {
    match err {
        Error::NotConfigured => NOT_CONFIGURED_MESSAGE.to_string(),
        err => format!("{}: {}", FAILURE_PREFIX, err),
    }
}
