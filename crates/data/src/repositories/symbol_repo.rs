//! Symbol catalog repository.

use anyhow::Result;
use binance_feed_core::Venue;

use crate::db::Database;
use crate::models::symbol::{SymbolRecord, STATUS_ACTIVE, STATUS_INACTIVE};

/// Repository for the `symbols` table.
#[derive(Debug, Clone)]
pub struct SymbolRepository {
    db: Database,
}

impl SymbolRepository {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upserts a catalog batch keyed on `(symbol, venue)`.
    ///
    /// # Errors
    /// Returns an error if the write transaction fails.
    pub async fn upsert_batch(&self, records: &[SymbolRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.write_tx().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO symbols
                    (symbol, venue, base_asset, quote_asset, status, contract_type,
                     delivery_date, onboard_date, tick_size, step_size, min_notional,
                     updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (symbol, venue) DO UPDATE SET
                    base_asset    = excluded.base_asset,
                    quote_asset   = excluded.quote_asset,
                    status        = excluded.status,
                    contract_type = excluded.contract_type,
                    delivery_date = excluded.delivery_date,
                    onboard_date  = excluded.onboard_date,
                    tick_size     = excluded.tick_size,
                    step_size     = excluded.step_size,
                    min_notional  = excluded.min_notional,
                    updated_at    = excluded.updated_at
                "#,
            )
            .bind(&record.symbol)
            .bind(&record.venue)
            .bind(&record.base_asset)
            .bind(&record.quote_asset)
            .bind(&record.status)
            .bind(&record.contract_type)
            .bind(record.delivery_date)
            .bind(record.onboard_date)
            .bind(record.tick_size)
            .bind(record.step_size)
            .bind(record.min_notional)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Lists ACTIVE symbols of one venue.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_active(&self, venue: Venue) -> Result<Vec<SymbolRecord>> {
        let records = sqlx::query_as::<_, SymbolRecord>(
            "SELECT * FROM symbols WHERE venue = ? AND status = ? ORDER BY symbol",
        )
        .bind(venue.as_str())
        .bind(STATUS_ACTIVE)
        .fetch_all(self.db.reader())
        .await?;
        Ok(records)
    }

    /// Lists every stored symbol regardless of status.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_all(&self) -> Result<Vec<SymbolRecord>> {
        let records =
            sqlx::query_as::<_, SymbolRecord>("SELECT * FROM symbols ORDER BY venue, symbol")
                .fetch_all(self.db.reader())
                .await?;
        Ok(records)
    }

    /// Fetches one symbol row.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get(&self, symbol: &str, venue: Venue) -> Result<Option<SymbolRecord>> {
        let record =
            sqlx::query_as::<_, SymbolRecord>("SELECT * FROM symbols WHERE symbol = ? AND venue = ?")
                .bind(symbol)
                .bind(venue.as_str())
                .fetch_optional(self.db.reader())
                .await?;
        Ok(record)
    }

    /// Marks ACTIVE symbols of `venue` that are absent from `live` as
    /// INACTIVE. Returns the number of transitioned rows.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn deactivate_missing(
        &self,
        venue: Venue,
        live: &[String],
        now_ms: i64,
    ) -> Result<u64> {
        let mut sql = format!(
            "UPDATE symbols SET status = '{STATUS_INACTIVE}', updated_at = ? \
             WHERE venue = ? AND status = '{STATUS_ACTIVE}'"
        );
        if !live.is_empty() {
            sql.push_str(" AND symbol NOT IN (");
            sql.push_str(&vec!["?"; live.len()].join(", "));
            sql.push(')');
        }

        let mut query = sqlx::query(&sql).bind(now_ms).bind(venue.as_str());
        for symbol in live {
            query = query.bind(symbol);
        }

        let result = query.execute(self.db.writer()).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("symbols.db")).await.unwrap();
        (dir, db)
    }

    fn record(symbol: &str, venue: Venue, status: &str) -> SymbolRecord {
        SymbolRecord {
            symbol: symbol.to_string(),
            venue: venue.as_str().to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            status: status.to_string(),
            contract_type: None,
            delivery_date: None,
            onboard_date: None,
            tick_size: Some(0.01),
            step_size: Some(0.001),
            min_notional: Some(5.0),
            updated_at: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_on_symbol_and_venue() {
        let (_dir, db) = test_db().await;
        let repo = SymbolRepository::new(db);

        repo.upsert_batch(&[
            record("BTCUSDT", Venue::Spot, STATUS_ACTIVE),
            record("BTCUSDT", Venue::UsdM, STATUS_ACTIVE),
        ])
        .await
        .unwrap();

        // Second refresh updates in place rather than duplicating.
        let mut updated = record("BTCUSDT", Venue::Spot, STATUS_ACTIVE);
        updated.tick_size = Some(0.1);
        updated.updated_at = 1_700_000_100_000;
        repo.upsert_batch(&[updated]).await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 2);

        let spot = repo.get("BTCUSDT", Venue::Spot).await.unwrap().unwrap();
        assert_eq!(spot.tick_size, Some(0.1));
        assert_eq!(spot.updated_at, 1_700_000_100_000);
    }

    #[tokio::test]
    async fn test_deactivation_of_missing_symbols() {
        let (_dir, db) = test_db().await;
        let repo = SymbolRepository::new(db);

        // Pre-seed LTCUSDT as ACTIVE, then refresh with a catalog that only
        // contains BTCUSDT.
        repo.upsert_batch(&[record("LTCUSDT", Venue::Spot, STATUS_ACTIVE)])
            .await
            .unwrap();
        repo.upsert_batch(&[record("BTCUSDT", Venue::Spot, STATUS_ACTIVE)])
            .await
            .unwrap();

        let transitioned = repo
            .deactivate_missing(Venue::Spot, &["BTCUSDT".to_string()], 1_700_000_200_000)
            .await
            .unwrap();
        assert_eq!(transitioned, 1);

        let active = repo.list_active(Venue::Spot).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].symbol, "BTCUSDT");

        let all = repo.list_all().await.unwrap();
        let ltc = all.iter().find(|s| s.symbol == "LTCUSDT").unwrap();
        assert_eq!(ltc.status, STATUS_INACTIVE);
    }

    #[tokio::test]
    async fn test_deactivation_scoped_to_venue() {
        let (_dir, db) = test_db().await;
        let repo = SymbolRepository::new(db);

        repo.upsert_batch(&[
            record("ETHUSDT", Venue::Spot, STATUS_ACTIVE),
            record("ETHUSDT", Venue::UsdM, STATUS_ACTIVE),
        ])
        .await
        .unwrap();

        repo.deactivate_missing(Venue::Spot, &[], 1_700_000_300_000)
            .await
            .unwrap();

        assert!(repo.list_active(Venue::Spot).await.unwrap().is_empty());
        assert_eq!(repo.list_active(Venue::UsdM).await.unwrap().len(), 1);
    }
}
