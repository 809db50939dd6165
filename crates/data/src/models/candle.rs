//! OHLCV candle records.

use serde::{Deserialize, Serialize};

/// One candle keyed on `(symbol, open_time)` within a per-interval table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CandleRecord {
    pub symbol: String,
    /// Window open time (ms).
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Base-asset volume.
    pub volume: f64,
    /// Quote-asset volume.
    pub quote_volume: f64,
    pub trade_count: i64,
    /// Window close time (ms).
    pub close_time: i64,
}
