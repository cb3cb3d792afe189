//! SQLite storage shared by the message and user repositories.
//!
//! Both repositories take a clone of the same pool. The schema lives in
//! `migrations/` and is applied every time a database is opened.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Writers wait this long on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the message database at `path`, creating the file and its parent
    /// directories on first run.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory: {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new().max_connections(5);
        Self::open(pool, options, &path.display().to_string()).await
    }

    /// A private in-memory database, used by tests.
    ///
    /// Every pooled connection to `:memory:` would see its own empty database,
    /// so the pool is pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database URL")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::open(pool, options, ":memory:").await
    }

    async fn open(
        pool: SqlitePoolOptions,
        options: SqliteConnectOptions,
        label: &str,
    ) -> Result<Self> {
        let pool = pool
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to database {label}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .with_context(|| format!("migrating database {label}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
