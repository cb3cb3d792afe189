use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::identity::Identity;

/// A user other clients can start a conversation with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Identity,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Record `id`, refreshing its display name if already known.
    async fn upsert(&self, id: &Identity, full_name: &str) -> Result<User>;

    /// Every known user except `me`, ordered by name.
    async fn list_except(&self, me: &Identity) -> Result<Vec<User>>;
}

/// SQLite-backed [`UserStore`].
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(User {
        id: Identity::new(row.try_get::<String, _>("id")?),
        full_name: row.try_get("full_name")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .context("invalid created_at")?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .context("invalid updated_at")?
            .with_timezone(&Utc),
    })
}

#[async_trait]
impl UserStore for UserRepository {
    #[instrument(skip(self))]
    async fn upsert(&self, id: &Identity, full_name: &str) -> Result<User> {
        let now = Utc::now()
            .trunc_subsecs(6)
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let row = sqlx::query(
            r#"
            INSERT INTO users (id, full_name, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                updated_at = excluded.updated_at
            RETURNING id, full_name, created_at, updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(full_name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert user")?;

        debug!("Recorded user {}", id);
        row_to_user(&row)
    }

    #[instrument(skip(self))]
    async fn list_except(&self, me: &Identity) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT id, full_name, created_at, updated_at
            FROM users
            WHERE id != ?
            ORDER BY full_name ASC, id ASC
            "#,
        )
        .bind(me.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        rows.iter().map(row_to_user).collect()
    }
}
