//! CVD series repository.

use anyhow::Result;

use crate::db::Database;
use crate::models::CvdRecord;

/// Repository for the `cvd_records` table.
#[derive(Debug, Clone)]
pub struct CvdRepository {
    db: Database,
}

impl CvdRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Writes a batch of series points, latest-wins on
    /// `(aggregator_id, timestamp)`.
    ///
    /// # Errors
    /// Returns an error if the write transaction fails.
    pub async fn upsert_batch(&self, records: &[CvdRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.write_tx().await?;
        for record in records {
            sqlx::query(
                "INSERT OR REPLACE INTO cvd_records
                    (aggregator_id, timestamp, cvd_value, z_score, delta, delta_z_score)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.aggregator_id)
            .bind(record.timestamp)
            .bind(record.cvd_value)
            .bind(record.z_score)
            .bind(record.delta)
            .bind(record.delta_z_score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fetches an aggregator's points at or after `since_ms`, ascending.
    /// Used to rebuild the rolling window on worker start.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_since(&self, aggregator_id: &str, since_ms: i64) -> Result<Vec<CvdRecord>> {
        let records = sqlx::query_as::<_, CvdRecord>(
            "SELECT * FROM cvd_records
             WHERE aggregator_id = ? AND timestamp >= ?
             ORDER BY timestamp ASC",
        )
        .bind(aggregator_id)
        .bind(since_ms)
        .fetch_all(self.db.reader())
        .await?;
        Ok(records)
    }

    /// Newest point of an aggregator's series.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_latest(&self, aggregator_id: &str) -> Result<Option<CvdRecord>> {
        let record = sqlx::query_as::<_, CvdRecord>(
            "SELECT * FROM cvd_records WHERE aggregator_id = ?
             ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(aggregator_id)
        .fetch_optional(self.db.reader())
        .await?;
        Ok(record)
    }
}
