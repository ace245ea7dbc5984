pub mod locks;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::StorageConfig,
    error::Result,
    models::{Conversation, ConversationExport, ExportFormat, Message, Role},
};
use sqlite::Sqlite;

#[async_trait]
pub trait Storage {
    /// Creates an empty conversation. A missing title falls back to the
    /// creation-time default.
    async fn create_conversation(
        &self,
        title: Option<&str>,
        provider: &str,
        model: &str,
    ) -> Result<Conversation>;

    async fn get_conversation(&self, id: &str) -> Result<Conversation>;

    /// Most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// Inserts the message and bumps the conversation's `updated_at` in one
    /// transaction. The returned message carries the store-assigned id and
    /// timestamp.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message>;

    /// Oldest first.
    async fn history(&self, conversation_id: &str) -> Result<Vec<Message>>;

    async fn delete_conversation(&self, id: &str) -> Result<()>;

    async fn export_conversation(&self, id: &str, format: ExportFormat) -> Result<String> {
        let conversation = self.get_conversation(id).await?;
        let messages = self.history(id).await?;
        ConversationExport::new(&conversation, &messages).render(format)
    }
}

pub type ArcStorage = Arc<dyn Storage + Send + Sync>;

pub async fn new_storage(config: &StorageConfig) -> Result<ArcStorage> {
    let storage = match config {
        StorageConfig::Sqlite(sqlite_config) => Arc::new(Sqlite::new(sqlite_config.path()).await?),
    };
    Ok(storage)
}
