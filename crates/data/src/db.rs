//! Embedded store handle.
//!
//! One writer connection serializes every write transaction; readers run on
//! a separate pool and tolerate WAL visibility. Write transactions begin
//! with `BEGIN IMMEDIATE` so concurrent writers from other processes back
//! off through `busy_timeout` instead of failing at commit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::migrations;

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Handle to one SQLite file (primary store or a per-asset store).
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    writer: SqlitePool,
    reader: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the primary store and applies migrations.
    ///
    /// # Errors
    /// Returns an error when the file cannot be opened or a migration fails.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), migrations::PRIMARY).await
    }

    /// Opens a per-asset aggregated-trade store.
    ///
    /// # Errors
    /// Returns an error when the file cannot be opened or a migration fails.
    pub async fn open_asset_store(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), migrations::ASSET).await
    }

    async fn open_with(path: &Path, set: &migrations::MigrationSet) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating store directory {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(5000))
            .foreign_keys(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .with_context(|| format!("opening store {}", path.display()))?;

        migrations::run(&writer, set).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options.create_if_missing(false).read_only(true))
            .await
            .with_context(|| format!("opening read pool for {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            reader,
        })
    }

    /// Starts a serialized write transaction (`BEGIN IMMEDIATE`).
    ///
    /// # Errors
    /// Returns an error when the write lock cannot be taken within the busy
    /// timeout.
    pub async fn write_tx(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.writer.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// The single-connection write pool.
    #[must_use]
    pub fn writer(&self) -> &SqlitePool {
        &self.writer
    }

    /// The concurrent read pool.
    #[must_use]
    pub fn reader(&self) -> &SqlitePool {
        &self.reader
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes both pools after in-flight work drains.
    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}
