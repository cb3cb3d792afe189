//! Durable message storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::models::{Message, NewMessage};
use crate::identity::Identity;

/// Storage collaborator used by the send-message workflow.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a validated message, generating its id and timestamps.
    async fn insert(&self, message: NewMessage) -> Result<Message>;

    /// All messages exchanged between `a` and `b`, oldest first.
    async fn conversation(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>>;
}

/// SQLite-backed [`MessageStore`].
#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid stored timestamp: {value}"))?
        .with_timezone(&Utc))
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Message {
        id: row.try_get("id")?,
        sender_identity: Identity::new(row.try_get::<String, _>("sender_identity")?),
        receiver_identity: Identity::new(row.try_get::<String, _>("receiver_identity")?),
        text: row.try_get("text")?,
        image_url: row.try_get("image_url")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl MessageStore for MessageRepository {
    #[instrument(
        skip(self, message),
        fields(sender = %message.sender, receiver = %message.receiver)
    )]
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        // Truncated to the stored precision so the returned record equals a later read.
        let now = Utc::now().trunc_subsecs(6);
        let stored = Message {
            id: Self::generate_id(),
            sender_identity: message.sender,
            receiver_identity: message.receiver,
            text: message.text,
            image_url: message.image_url,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, sender_identity, receiver_identity, text, image_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stored.id)
        .bind(stored.sender_identity.as_str())
        .bind(stored.receiver_identity.as_str())
        .bind(&stored.text)
        .bind(&stored.image_url)
        .bind(format_timestamp(&stored.created_at))
        .bind(format_timestamp(&stored.updated_at))
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;

        debug!("Stored message {}", stored.id);
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn conversation(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender_identity, receiver_identity, text, image_url, created_at, updated_at
            FROM messages
            WHERE (sender_identity = ? AND receiver_identity = ?)
               OR (sender_identity = ? AND receiver_identity = ?)
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(b.as_str())
        .bind(a.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch conversation")?;

        rows.iter().map(row_to_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn new_message(from: &str, to: &str, text: &str) -> NewMessage {
        NewMessage {
            sender: Identity::from(from),
            receiver: Identity::from(to),
            text: Some(text.to_string()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_insert_generates_id_and_timestamps() {
        let db = Database::in_memory().await.unwrap();
        let repo = MessageRepository::new(db.pool().clone());

        let stored = repo.insert(new_message("a", "b", "hi")).await.unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(stored.created_at, stored.updated_at);
        assert_eq!(stored.sender_identity.as_str(), "a");
        assert_eq!(stored.text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_conversation_includes_both_directions_in_order() {
        let db = Database::in_memory().await.unwrap();
        let repo = MessageRepository::new(db.pool().clone());

        let first = repo.insert(new_message("a", "b", "one")).await.unwrap();
        let second = repo.insert(new_message("b", "a", "two")).await.unwrap();
        repo.insert(new_message("a", "c", "elsewhere")).await.unwrap();

        let a = Identity::from("a");
        let b = Identity::from("b");
        let convo = repo.conversation(&a, &b).await.unwrap();
        assert_eq!(convo, vec![first.clone(), second.clone()]);

        // Symmetric regardless of argument order
        let convo = repo.conversation(&b, &a).await.unwrap();
        assert_eq!(convo, vec![first, second]);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("messages.db");

        let stored = {
            let db = Database::new(&path).await.unwrap();
            let repo = MessageRepository::new(db.pool().clone());
            repo.insert(new_message("a", "b", "kept")).await.unwrap()
        };

        let db = Database::new(&path).await.unwrap();
        let repo = MessageRepository::new(db.pool().clone());
        let convo = repo
            .conversation(&Identity::from("a"), &Identity::from("b"))
            .await
            .unwrap();
        assert_eq!(convo, vec![stored]);
    }
}
