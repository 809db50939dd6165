//! Real-time trade repository with rowid cursoring.

use anyhow::{anyhow, Result};
use binance_feed_core::{StreamType, TradeSide, Venue};
use sqlx::Row;

use crate::db::Database;
use crate::models::{TradeRecord, TradeRow, TradeStreamFilter};

/// Repository for the `trade_data` table.
#[derive(Debug, Clone)]
pub struct TradeRepository {
    db: Database,
}

impl TradeRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a trade batch; duplicate `(symbol, venue, trade_id)` keys are
    /// ignored. Returns the number of newly inserted rows.
    ///
    /// # Errors
    /// Returns an error if the write transaction fails; no partial batch is
    /// visible in that case.
    pub async fn insert_batch(&self, records: &[TradeRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        let mut tx = self.db.write_tx().await?;
        for record in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO trade_data
                    (symbol, venue, trade_id, timestamp, price, amount, direction, stream_type)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.symbol)
            .bind(record.venue.as_str())
            .bind(record.trade_id)
            .bind(record.timestamp)
            .bind(record.price)
            .bind(record.amount)
            .bind(record.direction.as_str())
            .bind(record.stream_type.as_str())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Fetches up to `limit` trades with `rowid > after_row_id` matching any
    /// of `filters`, in rowid (insertion) order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored row carries an
    /// unknown venue/side/stream value.
    pub async fn get_since_row_id(
        &self,
        filters: &[TradeStreamFilter],
        after_row_id: i64,
        limit: u32,
    ) -> Result<Vec<TradeRow>> {
        if filters.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT rowid AS row_id, symbol, venue, trade_id, timestamp, price, amount,
                    direction, stream_type
             FROM trade_data
             WHERE rowid > ? AND (",
        );
        let clause = "(symbol = ? AND venue = ? AND stream_type = ?)";
        sql.push_str(&vec![clause; filters.len()].join(" OR "));
        sql.push_str(") ORDER BY rowid ASC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(after_row_id);
        for filter in filters {
            query = query
                .bind(&filter.symbol)
                .bind(filter.venue.as_str())
                .bind(filter.stream_type.as_str());
        }
        query = query.bind(i64::from(limit));

        let rows = query.fetch_all(self.db.reader()).await?;
        rows.into_iter().map(|row| decode_row(&row)).collect()
    }

    /// Highest assigned rowid (0 when empty).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn max_row_id(&self) -> Result<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(rowid) FROM trade_data")
            .fetch_one(self.db.reader())
            .await?;
        Ok(max.unwrap_or(0))
    }

    /// Total stored trade count.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trade_data")
            .fetch_one(self.db.reader())
            .await?;
        Ok(count)
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<TradeRow> {
    let venue: String = row.get("venue");
    let direction: String = row.get("direction");
    let stream_type: String = row.get("stream_type");

    Ok(TradeRow {
        row_id: row.get("row_id"),
        trade: TradeRecord {
            symbol: row.get("symbol"),
            venue: Venue::parse(&venue).ok_or_else(|| anyhow!("unknown venue '{venue}'"))?,
            trade_id: row.get("trade_id"),
            timestamp: row.get("timestamp"),
            price: row.get("price"),
            amount: row.get("amount"),
            direction: TradeSide::parse(&direction)
                .ok_or_else(|| anyhow!("unknown direction '{direction}'"))?,
            stream_type: StreamType::parse(&stream_type)
                .ok_or_else(|| anyhow!("unknown stream type '{stream_type}'"))?,
        },
    })
}
