//! Candle repository over the per-interval tables.

use anyhow::Result;
use binance_feed_core::CandleInterval;

use crate::db::Database;
use crate::models::CandleRecord;

/// Repository for `candles_1m` / `candles_30m` / `candles_1d`.
#[derive(Debug, Clone)]
pub struct CandleRepository {
    db: Database,
}

impl CandleRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a candle batch; repeated `(symbol, open_time)` keys are no-ops.
    /// Returns the number of newly inserted rows.
    ///
    /// # Errors
    /// Returns an error if the write transaction fails.
    pub async fn insert_batch(
        &self,
        interval: CandleInterval,
        records: &[CandleRecord],
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT OR IGNORE INTO {}
                (symbol, open_time, open, high, low, close, volume, quote_volume,
                 trade_count, close_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            interval.table_name()
        );

        let mut inserted = 0;
        let mut tx = self.db.write_tx().await?;
        for record in records {
            let result = sqlx::query(&sql)
                .bind(&record.symbol)
                .bind(record.open_time)
                .bind(record.open)
                .bind(record.high)
                .bind(record.low)
                .bind(record.close)
                .bind(record.volume)
                .bind(record.quote_volume)
                .bind(record.trade_count)
                .bind(record.close_time)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Fetches candles of one symbol ordered by open time.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_range(
        &self,
        interval: CandleInterval,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<CandleRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE symbol = ? AND open_time >= ? AND open_time <= ?
             ORDER BY open_time ASC",
            interval.table_name()
        );
        let records = sqlx::query_as::<_, CandleRecord>(&sql)
            .bind(symbol)
            .bind(start_ms)
            .bind(end_ms)
            .fetch_all(self.db.reader())
            .await?;
        Ok(records)
    }

    /// The newest open time stored for a symbol, used to resume the candle
    /// collector.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn latest_open_time(
        &self,
        interval: CandleInterval,
        symbol: &str,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX(open_time) FROM {} WHERE symbol = ?",
            interval.table_name()
        );
        let latest: Option<i64> = sqlx::query_scalar(&sql)
            .bind(symbol)
            .fetch_one(self.db.reader())
            .await?;
        Ok(latest)
    }

    /// Deletes candles with `open_time` before the cutoff. Returns the
    /// number of removed rows.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn prune_before(&self, interval: CandleInterval, cutoff_ms: i64) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE open_time < ?", interval.table_name());
        let result = sqlx::query(&sql)
            .bind(cutoff_ms)
            .execute(self.db.writer())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(symbol: &str, open_time: i64) -> CandleRecord {
        CandleRecord {
            symbol: symbol.to_string(),
            open_time,
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 105.0,
            volume: 10.0,
            quote_volume: 1050.0,
            trade_count: 42,
            close_time: open_time + 59_999,
        }
    }

    #[tokio::test]
    async fn test_repeated_inserts_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("candles.db")).await.unwrap();
        let repo = CandleRepository::new(db);

        let batch = vec![candle("BTCUSDT", 1_700_000_000_000)];
        assert_eq!(
            repo.insert_batch(CandleInterval::OneMinute, &batch)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            repo.insert_batch(CandleInterval::OneMinute, &batch)
                .await
                .unwrap(),
            0
        );

        let stored = repo
            .get_range(
                CandleInterval::OneMinute,
                "BTCUSDT",
                0,
                2_000_000_000_000,
            )
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_intervals_are_separate_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("candles2.db")).await.unwrap();
        let repo = CandleRepository::new(db);

        let batch = vec![candle("ETHUSDT", 1_700_000_000_000)];
        repo.insert_batch(CandleInterval::OneMinute, &batch)
            .await
            .unwrap();

        let daily = repo
            .get_range(CandleInterval::OneDay, "ETHUSDT", 0, 2_000_000_000_000)
            .await
            .unwrap();
        assert!(daily.is_empty());
    }

    #[tokio::test]
    async fn test_prune_before() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("candles3.db")).await.unwrap();
        let repo = CandleRepository::new(db);

        repo.insert_batch(
            CandleInterval::ThirtyMinutes,
            &[
                candle("BTCUSDT", 1_000),
                candle("BTCUSDT", 2_000),
                candle("BTCUSDT", 3_000),
            ],
        )
        .await
        .unwrap();

        let removed = repo
            .prune_before(CandleInterval::ThirtyMinutes, 2_500)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        assert_eq!(
            repo.latest_open_time(CandleInterval::ThirtyMinutes, "BTCUSDT")
                .await
                .unwrap(),
            Some(3_000)
        );
    }
}
