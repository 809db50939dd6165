//! Push-channel event decoding.
//!
//! Combined-stream messages arrive as `{"stream": ..., "data": {...}}`;
//! single-stream messages are the bare payload. Decoding dispatches on the
//! `e` event-type field and silently drops anything unknown or malformed;
//! a bad message never takes the stream down.

use binance_feed_core::{StreamType, TradeSide, Venue};
use binance_feed_data::models::liquidation::derive_event_id;
use binance_feed_data::{LiquidationRecord, TradeRecord};
use serde::Deserialize;

/// A decoded push event.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Trade(TradeRecord),
    Liquidation(LiquidationRecord),
}

/// Converts a JSON value that may be a number or a numeric string.
#[must_use]
pub fn json_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Integer variant of [`json_f64`].
#[must_use]
pub fn json_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Aggregated trade event (`e == "aggTrade"`).
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    /// Aggregate trade sequence.
    #[serde(rename = "a")]
    pub agg_trade_id: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T", default)]
    pub trade_time: Option<i64>,
    /// true = buyer is maker = seller crossed the spread.
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl AggTradeEvent {
    /// Converts to a trade record; `None` when a numeric field fails to
    /// parse.
    #[must_use]
    pub fn to_trade(&self, venue: Venue) -> Option<TradeRecord> {
        Some(TradeRecord {
            symbol: self.symbol.clone(),
            venue,
            trade_id: self.agg_trade_id,
            timestamp: self.trade_time.unwrap_or(self.event_time),
            price: self.price.parse().ok()?,
            amount: self.quantity.parse().ok()?,
            direction: TradeSide::from_maker_flag(self.buyer_is_maker),
            stream_type: StreamType::AggTrade,
        })
    }
}

/// Raw trade event (`e == "trade"`).
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T", default)]
    pub trade_time: Option<i64>,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl TradeEvent {
    /// Converts to a trade record; `None` when a numeric field fails to
    /// parse.
    #[must_use]
    pub fn to_trade(&self, venue: Venue) -> Option<TradeRecord> {
        Some(TradeRecord {
            symbol: self.symbol.clone(),
            venue,
            trade_id: self.trade_id,
            timestamp: self.trade_time.unwrap_or(self.event_time),
            price: self.price.parse().ok()?,
            amount: self.quantity.parse().ok()?,
            direction: TradeSide::from_maker_flag(self.buyer_is_maker),
            stream_type: StreamType::Trade,
        })
    }
}

/// Liquidation event (`e == "forceOrder"`).
#[derive(Debug, Deserialize)]
pub struct ForceOrderEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "o")]
    pub order: ForceOrder,
}

/// Liquidation order details.
#[derive(Debug, Deserialize)]
pub struct ForceOrder {
    #[serde(rename = "s")]
    pub symbol: String,
    /// `SELL` liquidates longs, `BUY` liquidates shorts.
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "q", default)]
    pub original_quantity: Option<String>,
    #[serde(rename = "p", default)]
    pub price: Option<String>,
    #[serde(rename = "L", default)]
    pub last_filled_price: Option<String>,
    #[serde(rename = "ap", default)]
    pub average_price: Option<String>,
    #[serde(rename = "z", default)]
    pub filled_quantity: Option<String>,
    #[serde(rename = "l", default)]
    pub last_filled_quantity: Option<String>,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "i", default)]
    pub order_id: Option<i64>,
}

impl ForceOrderEvent {
    /// Converts to a liquidation record.
    ///
    /// Requires a BUY/SELL side and derivable original and filled
    /// quantities; the price falls back through `p -> L -> ap -> 0`.
    #[must_use]
    pub fn to_liquidation(&self, venue: Venue) -> Option<LiquidationRecord> {
        let side = match self.order.side.as_str() {
            "BUY" => TradeSide::Buy,
            "SELL" => TradeSide::Sell,
            _ => return None,
        };

        let original_quantity = parse_opt(&self.order.original_quantity)?;
        let filled_quantity = parse_opt(&self.order.filled_quantity)
            .or_else(|| parse_opt(&self.order.last_filled_quantity))?;

        let price = parse_opt(&self.order.price)
            .or_else(|| parse_opt(&self.order.last_filled_price))
            .or_else(|| parse_opt(&self.order.average_price))
            .unwrap_or(0.0);

        let event_id = derive_event_id(
            venue,
            self.order.order_id,
            &self.order.symbol,
            self.event_time,
            self.order.trade_time,
            side,
            filled_quantity,
        );

        Some(LiquidationRecord {
            event_id,
            symbol: self.order.symbol.clone(),
            venue,
            side,
            price,
            original_quantity,
            filled_quantity,
            event_time: self.event_time,
            trade_time: self.order.trade_time,
        })
    }
}

fn parse_opt(value: &Option<String>) -> Option<f64> {
    value.as_deref().and_then(|s| s.parse().ok())
}

/// Decodes one raw websocket text message into a typed event.
///
/// Unknown event types and malformed payloads return `None`.
#[must_use]
pub fn decode_message(venue: Venue, text: &str) -> Option<PushEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let payload = match value.get("data") {
        Some(data) => data.clone(),
        None => value,
    };

    match payload.get("e").and_then(serde_json::Value::as_str)? {
        "aggTrade" => serde_json::from_value::<AggTradeEvent>(payload)
            .ok()?
            .to_trade(venue)
            .map(PushEvent::Trade),
        "trade" => serde_json::from_value::<TradeEvent>(payload)
            .ok()?
            .to_trade(venue)
            .map(PushEvent::Trade),
        "forceOrder" => serde_json::from_value::<ForceOrderEvent>(payload)
            .ok()?
            .to_liquidation(venue)
            .map(PushEvent::Liquidation),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Trade decoding
    // =========================================================================

    const AGG_TRADE: &str = r#"{
        "e": "aggTrade",
        "E": 1699999999999,
        "s": "BTCUSDT",
        "a": 123456789,
        "p": "42750.50",
        "q": "0.150",
        "f": 100,
        "l": 102,
        "T": 1699999999998,
        "m": false
    }"#;

    #[test]
    fn test_decode_agg_trade_buy_aggressor() {
        let event = decode_message(Venue::UsdM, AGG_TRADE).unwrap();
        let PushEvent::Trade(trade) = event else {
            panic!("expected trade");
        };

        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.venue, Venue::UsdM);
        assert_eq!(trade.trade_id, 123_456_789);
        assert_eq!(trade.price, 42_750.50);
        assert_eq!(trade.amount, 0.150);
        assert_eq!(trade.direction, TradeSide::Buy);
        assert_eq!(trade.stream_type, StreamType::AggTrade);
        // Trade time preferred over event time.
        assert_eq!(trade.timestamp, 1_699_999_999_998);
    }

    #[test]
    fn test_decode_envelope_wrapped_message() {
        let wrapped = format!(r#"{{"stream": "btcusdt@aggTrade", "data": {AGG_TRADE}}}"#);
        let event = decode_message(Venue::Spot, &wrapped).unwrap();
        assert!(matches!(event, PushEvent::Trade(_)));
    }

    #[test]
    fn test_decode_raw_trade_sell_aggressor() {
        let json = r#"{
            "e": "trade",
            "E": 1699999999999,
            "s": "ETHUSDT",
            "t": 55,
            "p": "2000.1",
            "q": "3.5",
            "m": true
        }"#;

        let PushEvent::Trade(trade) = decode_message(Venue::Spot, json).unwrap() else {
            panic!("expected trade");
        };
        assert_eq!(trade.trade_id, 55);
        assert_eq!(trade.direction, TradeSide::Sell);
        assert_eq!(trade.stream_type, StreamType::Trade);
        // Falls back to event time when T is absent.
        assert_eq!(trade.timestamp, 1_699_999_999_999);
    }

    #[test]
    fn test_unknown_and_malformed_messages_are_dropped() {
        assert!(decode_message(Venue::Spot, r#"{"e": "kline", "s": "BTCUSDT"}"#).is_none());
        assert!(decode_message(Venue::Spot, "not json").is_none());
        assert!(decode_message(Venue::Spot, r#"{"no_event": true}"#).is_none());
    }

    #[test]
    fn test_unparseable_price_is_dropped() {
        let json = r#"{
            "e": "aggTrade",
            "E": 1,
            "s": "BTCUSDT",
            "a": 1,
            "p": "not-a-price",
            "q": "1.0",
            "m": false
        }"#;
        assert!(decode_message(Venue::Spot, json).is_none());
    }

    // =========================================================================
    // Liquidation decoding
    // =========================================================================

    fn force_order(side: &str, price: &str, z: &str) -> String {
        format!(
            r#"{{
                "e": "forceOrder",
                "E": 1699999999999,
                "o": {{
                    "s": "BTCUSDT",
                    "S": "{side}",
                    "q": "0.500",
                    "p": "{price}",
                    "ap": "42749.00",
                    "X": "FILLED",
                    "l": "0.500",
                    "z": "{z}",
                    "T": 1699999999998
                }}
            }}"#
        )
    }

    #[test]
    fn test_decode_force_order() {
        let json = force_order("SELL", "42750.00", "0.500");
        let PushEvent::Liquidation(liq) = decode_message(Venue::UsdM, &json).unwrap() else {
            panic!("expected liquidation");
        };

        assert_eq!(liq.symbol, "BTCUSDT");
        assert_eq!(liq.side, TradeSide::Sell);
        assert_eq!(liq.price, 42_750.0);
        assert_eq!(liq.original_quantity, 0.5);
        assert_eq!(liq.filled_quantity, 0.5);
        // No order id: composite event id.
        assert_eq!(
            liq.event_id,
            "USDT-M:BTCUSDT-1699999999999-1699999999998-sell-0.5"
        );
    }

    #[test]
    fn test_force_order_price_falls_back_to_average() {
        let json = r#"{
            "e": "forceOrder",
            "E": 1,
            "o": {
                "s": "BTCUSDT",
                "S": "BUY",
                "q": "1.0",
                "ap": "41000.5",
                "z": "1.0",
                "T": 2
            }
        }"#;
        let PushEvent::Liquidation(liq) = decode_message(Venue::UsdM, json).unwrap() else {
            panic!("expected liquidation");
        };
        assert_eq!(liq.price, 41_000.5);
        assert_eq!(liq.side, TradeSide::Buy);
    }

    #[test]
    fn test_force_order_requires_side_and_quantities() {
        // Unknown side.
        assert!(decode_message(Venue::UsdM, &force_order("BOTH", "1", "1")).is_none());

        // Missing filled quantity entirely.
        let json = r#"{
            "e": "forceOrder",
            "E": 1,
            "o": {"s": "BTCUSDT", "S": "SELL", "q": "1.0", "p": "1", "T": 2}
        }"#;
        assert!(decode_message(Venue::UsdM, json).is_none());
    }

    #[test]
    fn test_force_order_with_order_id_uses_it() {
        let json = r#"{
            "e": "forceOrder",
            "E": 1,
            "o": {
                "s": "BTCUSDT",
                "S": "SELL",
                "i": 987,
                "q": "1.0",
                "p": "25000",
                "z": "1.0",
                "T": 2
            }
        }"#;
        let PushEvent::Liquidation(liq) = decode_message(Venue::CoinM, json).unwrap() else {
            panic!("expected liquidation");
        };
        assert_eq!(liq.event_id, "COIN-M:987");
    }

    // =========================================================================
    // Numeric helpers
    // =========================================================================

    #[test]
    fn test_json_numeric_helpers_accept_both_forms() {
        assert_eq!(json_f64(&serde_json::json!("1.5")), Some(1.5));
        assert_eq!(json_f64(&serde_json::json!(1.5)), Some(1.5));
        assert_eq!(json_f64(&serde_json::json!(null)), None);
        assert_eq!(json_f64(&serde_json::json!("abc")), None);

        assert_eq!(json_i64(&serde_json::json!("42")), Some(42));
        assert_eq!(json_i64(&serde_json::json!(42)), Some(42));
    }
}
