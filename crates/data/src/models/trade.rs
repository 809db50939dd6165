//! Real-time trade records.
//!
//! Rows gain a monotone rowid surrogate on insert; the CVD worker cursors
//! over it, so ordering by rowid is ordering by insertion.

use binance_feed_core::{StreamType, TradeSide, Venue};
use serde::{Deserialize, Serialize};

/// One streamed trade, keyed on `(symbol, venue, trade_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub venue: Venue,
    /// Aggregated-trade sequence for `aggTrade`, trade id for `trade`.
    pub trade_id: i64,
    /// Trade time (ms).
    pub timestamp: i64,
    pub price: f64,
    pub amount: f64,
    pub direction: TradeSide,
    pub stream_type: StreamType,
}

impl TradeRecord {
    /// Signed amount for volume-delta accumulation.
    #[must_use]
    pub fn signed_amount(&self) -> f64 {
        self.direction.sign() * self.amount
    }
}

/// A persisted trade plus its rowid cursor position.
#[derive(Debug, Clone)]
pub struct TradeRow {
    /// Store-assigned monotone surrogate.
    pub row_id: i64,
    pub trade: TradeRecord,
}

/// Predicate used when cursoring trades for one aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeStreamFilter {
    pub symbol: String,
    pub venue: Venue,
    pub stream_type: StreamType,
}
