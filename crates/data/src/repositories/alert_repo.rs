//! Alert queue and history repository.

use anyhow::Result;

use crate::db::{now_ms, Database};
use crate::models::alert::MAX_ERROR_LEN;
use crate::models::{AlertQueueRecord, CvdAlertPayload};

/// Repository for `alert_queue` and `alert_history`.
#[derive(Debug, Clone)]
pub struct AlertRepository {
    db: Database,
}

impl AlertRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enqueues an alert payload. Returns the new queue id.
    ///
    /// # Errors
    /// Returns an error if serialization or the insert fails.
    pub async fn enqueue(&self, payload: &CvdAlertPayload) -> Result<i64> {
        let json = serde_json::to_string(payload)?;
        let result = sqlx::query(
            "INSERT INTO alert_queue
                (alert_type, symbol, timestamp, trigger_source, trigger_z_score,
                 z_score, delta, delta_z_score, threshold, cumulative_value,
                 payload, attempt_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&payload.alert_type)
        .bind(&payload.symbol)
        .bind(payload.timestamp)
        .bind(payload.trigger_source.as_str())
        .bind(payload.trigger_z_score)
        .bind(payload.z_score)
        .bind(payload.delta)
        .bind(payload.delta_z_score)
        .bind(payload.threshold)
        .bind(payload.cumulative_value)
        .bind(json)
        .bind(now_ms())
        .execute(self.db.writer())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Pending entries (`processed_at IS NULL`) in `(timestamp, id)` order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_pending(&self, limit: u32) -> Result<Vec<AlertQueueRecord>> {
        let records = sqlx::query_as::<_, AlertQueueRecord>(
            "SELECT * FROM alert_queue WHERE processed_at IS NULL
             ORDER BY timestamp ASC, id ASC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(self.db.reader())
        .await?;
        Ok(records)
    }

    /// Fetches one queue entry.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get(&self, id: i64) -> Result<Option<AlertQueueRecord>> {
        let record =
            sqlx::query_as::<_, AlertQueueRecord>("SELECT * FROM alert_queue WHERE id = ?")
                .bind(id)
                .fetch_optional(self.db.reader())
                .await?;
        Ok(record)
    }

    /// Increments an entry's attempt counter.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_attempt(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE alert_queue SET attempt_count = attempt_count + 1 WHERE id = ?")
            .bind(id)
            .execute(self.db.writer())
            .await?;
        Ok(())
    }

    /// Marks an entry processed; `clear_error` wipes the error on success and
    /// preserves it on terminal failure.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_processed(&self, id: i64, clear_error: bool) -> Result<()> {
        let sql = if clear_error {
            "UPDATE alert_queue SET processed_at = ?, last_error = NULL WHERE id = ?"
        } else {
            "UPDATE alert_queue SET processed_at = ? WHERE id = ?"
        };
        sqlx::query(sql)
            .bind(now_ms())
            .bind(id)
            .execute(self.db.writer())
            .await?;
        Ok(())
    }

    /// Records a failed attempt's error message, truncated to 512 chars.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_failure(&self, id: i64, message: &str) -> Result<()> {
        let truncated: String = message.chars().take(MAX_ERROR_LEN).collect();
        sqlx::query("UPDATE alert_queue SET last_error = ? WHERE id = ?")
            .bind(truncated)
            .bind(id)
            .execute(self.db.writer())
            .await?;
        Ok(())
    }

    /// Suppression check: true when any pending queue entry exists for
    /// `(alert_type, symbol)`, or alert history holds a dispatch with
    /// `timestamp >= since_ms`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn has_recent_alert_or_pending(
        &self,
        alert_type: &str,
        symbol: &str,
        since_ms: i64,
    ) -> Result<bool> {
        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alert_queue
             WHERE alert_type = ? AND symbol = ? AND processed_at IS NULL",
        )
        .bind(alert_type)
        .bind(symbol)
        .fetch_one(self.db.reader())
        .await?;
        if pending > 0 {
            return Ok(true);
        }

        let recent: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alert_history
             WHERE alert_type = ? AND symbol = ? AND timestamp >= ?",
        )
        .bind(alert_type)
        .bind(symbol)
        .bind(since_ms)
        .fetch_one(self.db.reader())
        .await?;
        Ok(recent > 0)
    }

    /// Appends a successfully dispatched alert to the permanent history.
    ///
    /// # Errors
    /// Returns an error if serialization or the insert fails.
    pub async fn insert_history(&self, payload: &CvdAlertPayload) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        sqlx::query(
            "INSERT INTO alert_history (alert_type, symbol, timestamp, payload, sent_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&payload.alert_type)
        .bind(&payload.symbol)
        .bind(payload.timestamp)
        .bind(json)
        .bind(now_ms())
        .execute(self.db.writer())
        .await?;
        Ok(())
    }

    /// Number of history rows for an aggregator (test and ops helper).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn history_count(&self, symbol: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alert_history WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(self.db.reader())
            .await?;
        Ok(count)
    }
}
