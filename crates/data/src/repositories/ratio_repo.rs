//! Top-trader ratio repository.

use anyhow::Result;

use crate::db::Database;
use crate::models::{RatioRecord, RatioSeries};

/// Repository for the two ratio series tables.
#[derive(Debug, Clone)]
pub struct RatioRepository {
    db: Database,
}

impl RatioRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a sample batch, latest-wins on `(symbol, timestamp)`.
    ///
    /// # Errors
    /// Returns an error if the write transaction fails.
    pub async fn insert_batch(&self, series: RatioSeries, records: &[RatioRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "INSERT OR REPLACE INTO {}
                (symbol, timestamp, long_short_ratio, long_account, short_account)
             VALUES (?, ?, ?, ?, ?)",
            series.table_name()
        );

        let mut tx = self.db.write_tx().await?;
        for record in records {
            sqlx::query(&sql)
                .bind(&record.symbol)
                .bind(record.timestamp)
                .bind(record.long_short_ratio)
                .bind(record.long_account)
                .bind(record.short_account)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fetches a symbol's samples ordered by timestamp.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_range(
        &self,
        series: RatioSeries,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<RatioRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE symbol = ? AND timestamp >= ? AND timestamp <= ?
             ORDER BY timestamp ASC",
            series.table_name()
        );
        let records = sqlx::query_as::<_, RatioRecord>(&sql)
            .bind(symbol)
            .bind(start_ms)
            .bind(end_ms)
            .fetch_all(self.db.reader())
            .await?;
        Ok(records)
    }

    /// Deletes samples older than the cutoff from both series. Returns the
    /// total number of removed rows.
    ///
    /// # Errors
    /// Returns an error if a delete fails.
    pub async fn prune_before(&self, cutoff_ms: i64) -> Result<u64> {
        let mut removed = 0;
        for series in [RatioSeries::Position, RatioSeries::Account] {
            let sql = format!("DELETE FROM {} WHERE timestamp < ?", series.table_name());
            let result = sqlx::query(&sql)
                .bind(cutoff_ms)
                .execute(self.db.writer())
                .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}
