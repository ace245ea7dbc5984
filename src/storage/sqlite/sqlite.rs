#[cfg(test)]
#[path = "sqlite_test.rs"]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, OpenFlags, OptionalExtension, Row, named_params, params};

use crate::{
    error::{Error, Result},
    models::{Conversation, Message, Role, default_title},
    storage::{Storage, locks::ConversationLocks},
};

use super::migration::MIGRATION;

pub struct Sqlite {
    conn: Connection,
    locks: ConversationLocks,
}

impl Sqlite {
    pub async fn new(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(path) => {
                Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
                )
                .await?
            }
            None => Connection::open_in_memory().await?,
        };

        let ret = Self {
            conn,
            locks: ConversationLocks::default(),
        };
        ret.run_migration().await?;
        Ok(ret)
    }

    async fn run_migration(&self) -> Result<()> {
        self.conn
            .call(|conn| Ok(conn.execute_batch(MIGRATION)?))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for Sqlite {
    async fn create_conversation(
        &self,
        title: Option<&str>,
        provider: &str,
        model: &str,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let title = match title.map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => default_title(now),
        };

        let conversation = Conversation::new(uuid::Uuid::new_v4().to_string())
            .with_title(title)
            .with_provider(provider)
            .with_model(model)
            .with_created_at(now)
            .with_updated_at(now);

        let row = conversation.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO conversations (id, title, provider, model, created_at, updated_at)
                VALUES (:id, :title, :provider, :model, :created_at, :updated_at)"#,
                    named_params! {
                        ":id": row.id(),
                        ":title": row.title(),
                        ":provider": row.provider(),
                        ":model": row.model(),
                        ":created_at": row.created_at().timestamp_millis(),
                        ":updated_at": row.updated_at().timestamp_millis(),
                    },
                )?;
                Ok(())
            })
            .await?;

        log::debug!("Created conversation {}", conversation.id());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        let key = id.to_string();
        let conversation = self
            .conn
            .call(move |conn| {
                let conversation = conn
                    .query_row(
                        "SELECT id, title, provider, model, created_at, updated_at FROM conversations WHERE id = ?",
                        params![key],
                        |row| Ok(conversation_from_row(row)),
                    )
                    .optional()?
                    .transpose()?;
                Ok(conversation)
            })
            .await?;

        conversation.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conversations = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, title, provider, model, created_at, updated_at FROM conversations
                ORDER BY updated_at DESC, rowid DESC"#,
                )?;
                let mut rows = stmt.query([])?;

                let mut conversations = vec![];
                while let Some(row) = rows.next()? {
                    conversations.push(conversation_from_row(row)?);
                }
                Ok(conversations)
            })
            .await?;
        Ok(conversations)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let _guard = self.locks.acquire(conversation_id).await;

        let key = conversation_id.to_string();
        let content = content.to_string();
        let message = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let updated_at: Option<i64> = tx
                    .query_row(
                        "SELECT updated_at FROM conversations WHERE id = ?",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(updated_at) = updated_at else {
                    return Ok(None);
                };

                let last: Option<i64> = tx.query_row(
                    "SELECT MAX(timestamp) FROM messages WHERE conversation_id = ?",
                    params![key],
                    |row| row.get(0),
                )?;

                // Strictly after the previous message and never behind updated_at.
                let timestamp = Utc::now()
                    .timestamp_millis()
                    .max(updated_at)
                    .max(last.map(|t| t + 1).unwrap_or(i64::MIN));

                tx.execute(
                    r#"INSERT INTO messages (conversation_id, role, content, timestamp)
                VALUES (:conversation_id, :role, :content, :timestamp)"#,
                    named_params! {
                        ":conversation_id": key,
                        ":role": role.as_str(),
                        ":content": content,
                        ":timestamp": timestamp,
                    },
                )?;
                let id = tx.last_insert_rowid();

                tx.execute(
                    "UPDATE conversations SET updated_at = ? WHERE id = ?",
                    params![timestamp, key],
                )?;
                tx.commit()?;

                Ok(Some(
                    Message::new(role, content)
                        .with_id(id)
                        .with_conversation_id(key)
                        .with_timestamp(from_millis(timestamp)?),
                ))
            })
            .await?;

        message.ok_or_else(|| Error::NotFound(conversation_id.to_string()))
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let key = conversation_id.to_string();
        let messages = self
            .conn
            .call(move |conn| {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM conversations WHERE id = ?",
                        params![key],
                        |_| Ok(()),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Ok(None);
                }

                let mut stmt = conn.prepare(
                    r#"SELECT id, conversation_id, role, content, timestamp FROM messages
                WHERE conversation_id = ? ORDER BY timestamp ASC, id ASC"#,
                )?;
                let mut rows = stmt.query(params![key])?;

                let mut messages = vec![];
                while let Some(row) = rows.next()? {
                    messages.push(message_from_row(row)?);
                }
                Ok(Some(messages))
            })
            .await?;

        messages.ok_or_else(|| Error::NotFound(conversation_id.to_string()))
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let _guard = self.locks.acquire(id).await;

        let key = id.to_string();
        let affected_rows = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM messages WHERE conversation_id = ?",
                    params![key],
                )?;
                let affected = tx.execute("DELETE FROM conversations WHERE id = ?", params![key])?;
                tx.commit()?;
                Ok(affected)
            })
            .await?;

        if affected_rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        log::debug!("Deleted conversation {}", id);
        Ok(())
    }
}

fn conversation_from_row(row: &Row<'_>) -> Result<Conversation, tokio_rusqlite::Error> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let provider: String = row.get(2)?;
    let model: String = row.get(3)?;
    let created_at: i64 = row.get(4)?;
    let updated_at: i64 = row.get(5)?;

    Ok(Conversation::new(id)
        .with_title(title)
        .with_provider(provider)
        .with_model(model)
        .with_created_at(from_millis(created_at)?)
        .with_updated_at(from_millis(updated_at)?))
}

fn message_from_row(row: &Row<'_>) -> Result<Message, tokio_rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let timestamp: i64 = row.get(4)?;

    let role = role
        .parse::<Role>()
        .map_err(|e| tokio_rusqlite::Error::Other(eyre::eyre!(e).into()))?;

    Ok(Message::new(role, content)
        .with_id(id)
        .with_conversation_id(conversation_id)
        .with_timestamp(from_millis(timestamp)?))
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, tokio_rusqlite::Error> {
    DateTime::from_timestamp_millis(millis).ok_or(tokio_rusqlite::Error::Other(
        eyre::eyre!("invalid timestamp {}", millis).into(),
    ))
}
