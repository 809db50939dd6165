//! Liquidation (force-order) events.

use binance_feed_core::{TradeSide, Venue};
use serde::{Deserialize, Serialize};

/// One liquidation event.
///
/// The primary key is a derived `event_id`; duplicate ids are silently
/// ignored on insert, so the first observation wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationRecord {
    /// `venue:orderId` when an order id is present, else the composite form
    /// built by [`derive_event_id`].
    pub event_id: String,
    pub symbol: String,
    pub venue: Venue,
    /// Liquidation order side as reported (`BUY` closes shorts, `SELL` longs).
    pub side: TradeSide,
    pub price: f64,
    pub original_quantity: f64,
    pub filled_quantity: f64,
    /// Exchange event time (ms).
    pub event_time: i64,
    /// Order trade time (ms).
    pub trade_time: i64,
}

impl LiquidationRecord {
    /// Notional value of the filled portion.
    #[must_use]
    pub fn usd_value(&self) -> f64 {
        self.filled_quantity * self.price
    }
}

/// Builds the stable event id for a liquidation.
///
/// `venue:orderId` when the exchange supplies an order id; otherwise a
/// composite of the identifying fields.
#[must_use]
pub fn derive_event_id(
    venue: Venue,
    order_id: Option<i64>,
    symbol: &str,
    event_time: i64,
    trade_time: i64,
    side: TradeSide,
    filled_quantity: f64,
) -> String {
    match order_id {
        Some(id) => format!("{venue}:{id}"),
        None => format!("{venue}:{symbol}-{event_time}-{trade_time}-{side}-{filled_quantity}"),
    }
}
