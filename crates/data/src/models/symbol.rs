//! Venue symbol catalog entries.

use binance_feed_core::Venue;
use serde::{Deserialize, Serialize};

/// Status of a listed symbol.
pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_INACTIVE: &str = "INACTIVE";

/// One `(symbol, venue)` catalog entry.
///
/// Upserted on catalog refresh; transitioned to INACTIVE when absent from the
/// latest catalog; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SymbolRecord {
    /// Exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Venue string form (`SPOT`, `USDT-M`, `COIN-M`).
    pub venue: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// `ACTIVE` or `INACTIVE`.
    pub status: String,
    /// Futures contract type, e.g. `PERPETUAL`; absent on spot.
    pub contract_type: Option<String>,
    /// Delivery date (ms) for dated contracts.
    pub delivery_date: Option<i64>,
    /// Listing date (ms) on futures venues.
    pub onboard_date: Option<i64>,
    pub tick_size: Option<f64>,
    pub step_size: Option<f64>,
    pub min_notional: Option<f64>,
    /// Last catalog refresh that touched this row (ms).
    pub updated_at: i64,
}

impl SymbolRecord {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Parsed venue; `None` for rows written by a newer schema.
    #[must_use]
    pub fn parsed_venue(&self) -> Option<Venue> {
        Venue::parse(&self.venue)
    }

    /// True for perpetual or unspecified contract types, the set the ratio
    /// and historical collectors operate on.
    #[must_use]
    pub fn is_perpetual_or_unspecified(&self) -> bool {
        match self.contract_type.as_deref() {
            None | Some("") | Some("PERPETUAL") => true,
            Some(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(contract_type: Option<&str>) -> SymbolRecord {
        SymbolRecord {
            symbol: "BTCUSDT".to_string(),
            venue: Venue::UsdM.as_str().to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            status: STATUS_ACTIVE.to_string(),
            contract_type: contract_type.map(str::to_string),
            delivery_date: None,
            onboard_date: Some(1_569_398_400_000),
            tick_size: Some(0.1),
            step_size: Some(0.001),
            min_notional: Some(5.0),
            updated_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_perpetual_filter() {
        assert!(sample(Some("PERPETUAL")).is_perpetual_or_unspecified());
        assert!(sample(None).is_perpetual_or_unspecified());
        assert!(sample(Some("")).is_perpetual_or_unspecified());
        assert!(!sample(Some("CURRENT_QUARTER")).is_perpetual_or_unspecified());
    }

    #[test]
    fn test_parsed_venue() {
        assert_eq!(sample(None).parsed_venue(), Some(Venue::UsdM));
    }
}
