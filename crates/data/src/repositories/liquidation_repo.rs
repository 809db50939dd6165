//! Liquidation event repository.

use anyhow::{anyhow, Result};
use binance_feed_core::{TradeSide, Venue};
use sqlx::Row;

use crate::db::Database;
use crate::models::LiquidationRecord;

/// Repository for the `liquidation_events` table.
#[derive(Debug, Clone)]
pub struct LiquidationRepository {
    db: Database,
}

impl LiquidationRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a batch; duplicate `event_id`s are silently ignored (first
    /// observation wins). Returns the number of newly inserted rows.
    ///
    /// # Errors
    /// Returns an error if the write transaction fails.
    pub async fn insert_batch(&self, records: &[LiquidationRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        let mut tx = self.db.write_tx().await?;
        for record in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO liquidation_events
                    (event_id, symbol, venue, side, price, original_quantity,
                     filled_quantity, event_time, trade_time)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.event_id)
            .bind(&record.symbol)
            .bind(record.venue.as_str())
            .bind(record.side.as_str())
            .bind(record.price)
            .bind(record.original_quantity)
            .bind(record.filled_quantity)
            .bind(record.event_time)
            .bind(record.trade_time)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Fetches one event by id.
    ///
    /// # Errors
    /// Returns an error if the query fails or the row carries unknown enum
    /// values.
    pub async fn get(&self, event_id: &str) -> Result<Option<LiquidationRecord>> {
        let row = sqlx::query("SELECT * FROM liquidation_events WHERE event_id = ?")
            .bind(event_id)
            .fetch_optional(self.db.reader())
            .await?;
        row.map(|r| decode_row(&r)).transpose()
    }

    /// Total stored event count.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM liquidation_events")
            .fetch_one(self.db.reader())
            .await?;
        Ok(count)
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<LiquidationRecord> {
    let venue: String = row.get("venue");
    let side: String = row.get("side");

    Ok(LiquidationRecord {
        event_id: row.get("event_id"),
        symbol: row.get("symbol"),
        venue: Venue::parse(&venue).ok_or_else(|| anyhow!("unknown venue '{venue}'"))?,
        side: TradeSide::parse(&side).ok_or_else(|| anyhow!("unknown side '{side}'"))?,
        price: row.get("price"),
        original_quantity: row.get("original_quantity"),
        filled_quantity: row.get("filled_quantity"),
        event_time: row.get("event_time"),
        trade_time: row.get("trade_time"),
    })
}
