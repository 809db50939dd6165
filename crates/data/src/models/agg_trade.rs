//! Aggregated trade records (historical REST pulls and push duplicates).

use binance_feed_core::{TradeSource, Venue};
use serde::{Deserialize, Serialize};

/// One aggregated trade, keyed on `(symbol, venue, trade_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggTradeRecord {
    pub symbol: String,
    pub venue: Venue,
    pub trade_id: i64,
    pub price: f64,
    pub quantity: f64,
    pub first_trade_id: i64,
    pub last_trade_id: i64,
    /// Trade time (ms).
    pub trade_time: i64,
    pub is_buyer_maker: bool,
    /// Spot-only best-match flag.
    pub is_best_match: Option<bool>,
    pub source: TradeSource,
}

/// Resume point for the historical collector, derived from the newest stored
/// trade of a `(symbol, venue)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct AggTradeCheckpoint {
    pub trade_id: i64,
    pub trade_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agg_trade_serde_roundtrip() {
        let trade = AggTradeRecord {
            symbol: "ETHUSDT".to_string(),
            venue: Venue::Spot,
            trade_id: 101,
            price: 2000.0,
            quantity: 3.25,
            first_trade_id: 500,
            last_trade_id: 503,
            trade_time: 1_700_000_000_000,
            is_buyer_maker: false,
            is_best_match: Some(true),
            source: TradeSource::Rest,
        };

        let json = serde_json::to_string(&trade).unwrap();
        let back: AggTradeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(trade, back);
    }
}
