//! Processing-state checkpoints.

use anyhow::Result;

use crate::db::{now_ms, Database};

/// One `(process_name, key)` checkpoint row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProcessingState {
    pub process_name: String,
    pub key: String,
    pub last_row_id: i64,
    pub last_timestamp: i64,
    pub updated_at: i64,
}

/// Repository for the `processing_state` table.
///
/// `last_row_id` is monotone non-decreasing: the upsert keeps the maximum of
/// the stored and incoming cursor, so a stale writer can never move a
/// consumer backwards.
#[derive(Debug, Clone)]
pub struct ProcessingStateRepository {
    db: Database,
}

impl ProcessingStateRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetches one checkpoint.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get(&self, process_name: &str, key: &str) -> Result<Option<ProcessingState>> {
        let state = sqlx::query_as::<_, ProcessingState>(
            "SELECT * FROM processing_state WHERE process_name = ? AND key = ?",
        )
        .bind(process_name)
        .bind(key)
        .fetch_optional(self.db.reader())
        .await?;
        Ok(state)
    }

    /// Advances a checkpoint; `last_row_id` never decreases.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn upsert(
        &self,
        process_name: &str,
        key: &str,
        last_row_id: i64,
        last_timestamp: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO processing_state
                (process_name, key, last_row_id, last_timestamp, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (process_name, key) DO UPDATE SET
                last_row_id    = MAX(processing_state.last_row_id, excluded.last_row_id),
                last_timestamp = excluded.last_timestamp,
                updated_at     = excluded.updated_at",
        )
        .bind(process_name)
        .bind(key)
        .bind(last_row_id)
        .bind(last_timestamp)
        .bind(now_ms())
        .execute(self.db.writer())
        .await?;
        Ok(())
    }
}
