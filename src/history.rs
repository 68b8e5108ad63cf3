use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::types::{ChatMessage, ConversationId, Result, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub feedback: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed conversation history. Every query is scoped to one user.
#[derive(Clone)]
pub struct ConversationStore {
    pool: DbPool,
    enable_feedback: bool,
}

impl ConversationStore {
    pub fn new(pool: DbPool, enable_feedback: bool) -> Self {
        Self {
            pool,
            enable_feedback,
        }
    }

    /// Verifies the schema is reachable.
    pub async fn ensure(&self) -> Result<()> {
        sqlx::query("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_conversation(&self, user: &UserId, title: &str) -> Result<Conversation> {
        let ts = now();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.0.clone(),
            title: title.to_string(),
            created_at: ts.clone(),
            updated_at: ts,
        };
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(&conversation.created_at)
        .bind(&conversation.updated_at)
        .execute(&self.pool)
        .await?;
        tracing::info!(conversation = %prefix(&conversation.id), "Conversation created");
        Ok(conversation)
    }

    pub async fn upsert_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        let mut updated = conversation.clone();
        updated.updated_at = now();
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at",
        )
        .bind(&updated.id)
        .bind(&updated.user_id)
        .bind(&updated.title)
        .bind(&updated.created_at)
        .bind(&updated.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(updated)
    }

    pub async fn delete_conversation(&self, user: &UserId, id: &ConversationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ? AND user_id = ?")
            .bind(&id.0)
            .bind(&user.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_messages(&self, id: &ConversationId, user: &UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE conversation_id = ? AND user_id = ?")
            .bind(&id.0)
            .bind(&user.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Newest first. `limit: None` returns everything.
    pub async fn get_conversations(
        &self,
        user: &UserId,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, Conversation>(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations
             WHERE user_id = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        )
        .bind(&user.0)
        .bind(limit.unwrap_or(-1))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_conversation(
        &self,
        user: &UserId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, Conversation>(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations
             WHERE id = ? AND user_id = ?",
        )
        .bind(&id.0)
        .bind(&user.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Returns `None` when the conversation does not exist for this user.
    pub async fn create_message(
        &self,
        message_id: &str,
        conversation_id: &ConversationId,
        user: &UserId,
        input: &ChatMessage,
    ) -> Result<Option<StoredMessage>> {
        if self.get_conversation(user, conversation_id).await?.is_none() {
            return Ok(None);
        }

        let ts = now();
        let message = StoredMessage {
            id: message_id.to_string(),
            conversation_id: conversation_id.0.clone(),
            user_id: user.0.clone(),
            role: input.role.as_str().to_string(),
            content: input.content.clone(),
            feedback: self.enable_feedback.then(String::new),
            created_at: ts.clone(),
            updated_at: ts.clone(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, user_id, role, content, feedback, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.user_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(&message.feedback)
        .bind(&message.created_at)
        .bind(&message.updated_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(&ts)
            .bind(&conversation_id.0)
            .bind(&user.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(
            conversation = %conversation_id.short(),
            role = %message.role,
            "Message stored"
        );
        Ok(Some(message))
    }

    pub async fn update_message_feedback(
        &self,
        user: &UserId,
        message_id: &str,
        feedback: &str,
    ) -> Result<Option<StoredMessage>> {
        let result = sqlx::query(
            "UPDATE messages SET feedback = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(feedback)
        .bind(now())
        .bind(message_id)
        .bind(&user.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, StoredMessage>(
            "SELECT id, conversation_id, user_id, role, content, feedback, created_at, updated_at
             FROM messages WHERE id = ? AND user_id = ?",
        )
        .bind(message_id)
        .bind(&user.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Oldest first.
    pub async fn get_messages(
        &self,
        user: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query_as::<_, StoredMessage>(
            "SELECT id, conversation_id, user_id, role, content, feedback, created_at, updated_at
             FROM messages WHERE conversation_id = ? AND user_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&conversation_id.0)
        .bind(&user.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn prefix(id: &str) -> &str {
    crate::types::prefix_chars(id, 6)
}
