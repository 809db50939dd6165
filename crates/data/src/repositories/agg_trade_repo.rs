//! Aggregated-trade repository (primary store and per-asset stores).

use anyhow::Result;
use binance_feed_core::Venue;

use crate::db::Database;
use crate::models::{AggTradeCheckpoint, AggTradeRecord};

/// Repository for the `agg_trades` table.
#[derive(Debug, Clone)]
pub struct AggTradeRepository {
    db: Database,
}

impl AggTradeRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a batch; duplicate `(symbol, venue, trade_id)` keys are
    /// ignored so push and REST sources can overlap. Returns the number of
    /// newly inserted rows.
    ///
    /// # Errors
    /// Returns an error if the write transaction fails.
    pub async fn upsert_batch(&self, records: &[AggTradeRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        let mut tx = self.db.write_tx().await?;
        for record in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO agg_trades
                    (symbol, venue, trade_id, price, quantity, first_trade_id,
                     last_trade_id, trade_time, is_buyer_maker, is_best_match, source)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.symbol)
            .bind(record.venue.as_str())
            .bind(record.trade_id)
            .bind(record.price)
            .bind(record.quantity)
            .bind(record.first_trade_id)
            .bind(record.last_trade_id)
            .bind(record.trade_time)
            .bind(record.is_buyer_maker)
            .bind(record.is_best_match)
            .bind(record.source.as_str())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Resume point for a `(symbol, venue)` pair: the newest stored trade by
    /// trade time (trade id breaks ties).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn last_checkpoint(
        &self,
        symbol: &str,
        venue: Venue,
    ) -> Result<Option<AggTradeCheckpoint>> {
        let checkpoint = sqlx::query_as::<_, AggTradeCheckpoint>(
            "SELECT trade_id, trade_time FROM agg_trades
             WHERE symbol = ? AND venue = ?
             ORDER BY trade_time DESC, trade_id DESC
             LIMIT 1",
        )
        .bind(symbol)
        .bind(venue.as_str())
        .fetch_optional(self.db.reader())
        .await?;
        Ok(checkpoint)
    }

    /// Stored row count for a `(symbol, venue)` pair.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_for(&self, symbol: &str, venue: Venue) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM agg_trades WHERE symbol = ? AND venue = ?")
                .bind(symbol)
                .bind(venue.as_str())
                .fetch_one(self.db.reader())
                .await?;
        Ok(count)
    }
}
