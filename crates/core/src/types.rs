//! Domain primitives shared across the pipeline.
//!
//! Venues, stream kinds and trade sides are stored as their canonical string
//! forms in the database, so every enum here carries an `as_str` and a parser.

use serde::{Deserialize, Serialize};

/// A Binance market venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Venue {
    /// Spot market.
    #[serde(rename = "SPOT")]
    Spot,
    /// USDT-margined perpetual futures.
    #[serde(rename = "USDT-M")]
    UsdM,
    /// Coin-margined perpetual futures.
    #[serde(rename = "COIN-M")]
    CoinM,
}

impl Venue {
    /// All venues, in catalog-refresh order.
    pub const ALL: [Self; 3] = [Self::Spot, Self::UsdM, Self::CoinM];

    /// Canonical string form used in storage and config.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "SPOT",
            Self::UsdM => "USDT-M",
            Self::CoinM => "COIN-M",
        }
    }

    /// Parses the canonical string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SPOT" => Some(Self::Spot),
            "USDT-M" => Some(Self::UsdM),
            "COIN-M" => Some(Self::CoinM),
            _ => None,
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of real-time trade stream a subscription reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    /// Aggregated trade stream (`@aggTrade`).
    #[serde(rename = "aggTrade")]
    AggTrade,
    /// Raw trade stream (`@trade`).
    #[serde(rename = "trade")]
    Trade,
}

impl StreamType {
    /// Channel suffix and storage form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AggTrade => "aggTrade",
            Self::Trade => "trade",
        }
    }

    /// Parses the storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aggTrade" => Some(Self::AggTrade),
            "trade" => Some(Self::Trade),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of a trade determined by the aggressor.
///
/// Binance reports whether the buyer was the maker:
/// - `m=true`: buyer was maker, so the seller crossed the spread -> Sell
/// - `m=false`: buyer crossed the spread -> Buy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    /// Buyer was the aggressor (taker).
    #[serde(rename = "buy")]
    Buy,
    /// Seller was the aggressor (taker).
    #[serde(rename = "sell")]
    Sell,
}

impl TradeSide {
    /// Converts from Binance's `m` (buyer is maker) flag.
    #[must_use]
    pub const fn from_maker_flag(buyer_is_maker: bool) -> Self {
        if buyer_is_maker {
            Self::Sell
        } else {
            Self::Buy
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Sign applied to a quantity when accumulating volume delta.
    #[must_use]
    pub const fn sign(&self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle interval supported by the REST collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1d")]
    OneDay,
}

impl CandleInterval {
    /// All supported intervals.
    pub const ALL: [Self; 3] = [Self::OneMinute, Self::ThirtyMinutes, Self::OneDay];

    /// Interval string as sent to the exchange.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThirtyMinutes => "30m",
            Self::OneDay => "1d",
        }
    }

    /// Per-interval candle table name.
    #[must_use]
    pub const fn table_name(&self) -> &'static str {
        match self {
            Self::OneMinute => "candles_1m",
            Self::ThirtyMinutes => "candles_30m",
            Self::OneDay => "candles_1d",
        }
    }

    /// Interval duration in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> i64 {
        match self {
            Self::OneMinute => 60_000,
            Self::ThirtyMinutes => 1_800_000,
            Self::OneDay => 86_400_000,
        }
    }
}

/// Where a persisted aggregated trade came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSource {
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "rest")]
    Rest,
}

impl TradeSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Rest => "rest",
        }
    }
}

/// Process role selected at startup.
///
/// Each role initializes only the component subset it needs; the roles share
/// the store file and coordinate through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Streaming + scheduled collectors, symbol registry, backup.
    Ingest,
    /// CVD aggregation worker.
    Aggregate,
    /// Alert queue dispatcher.
    Alert,
}

impl ProcessRole {
    /// Parses the `BINANCE_PROCESS_ROLE` value (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ingest" => Some(Self::Ingest),
            "aggregate" => Some(Self::Aggregate),
            "alert" => Some(Self::Alert),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Aggregate => "aggregate",
            Self::Alert => "alert",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Venue Tests
    // =========================================================================

    #[test]
    fn test_venue_roundtrip() {
        for venue in Venue::ALL {
            assert_eq!(Venue::parse(venue.as_str()), Some(venue));
        }
    }

    #[test]
    fn test_venue_parse_unknown() {
        assert_eq!(Venue::parse("MARGIN"), None);
        assert_eq!(Venue::parse("spot"), None);
    }

    #[test]
    fn test_venue_serde_uses_canonical_names() {
        assert_eq!(serde_json::to_string(&Venue::UsdM).unwrap(), "\"USDT-M\"");
        let venue: Venue = serde_json::from_str("\"COIN-M\"").unwrap();
        assert_eq!(venue, Venue::CoinM);
    }

    // =========================================================================
    // TradeSide Tests
    // =========================================================================

    #[test]
    fn test_buyer_maker_means_sell_aggressor() {
        assert_eq!(TradeSide::from_maker_flag(true), TradeSide::Sell);
        assert_eq!(TradeSide::from_maker_flag(false), TradeSide::Buy);
    }

    #[test]
    fn test_trade_side_sign() {
        assert_eq!(TradeSide::Buy.sign(), 1.0);
        assert_eq!(TradeSide::Sell.sign(), -1.0);
    }

    #[test]
    fn test_trade_side_roundtrip() {
        assert_eq!(TradeSide::parse("buy"), Some(TradeSide::Buy));
        assert_eq!(TradeSide::parse("sell"), Some(TradeSide::Sell));
        assert_eq!(TradeSide::parse("BUY"), None);
    }

    // =========================================================================
    // StreamType / Interval Tests
    // =========================================================================

    #[test]
    fn test_stream_type_roundtrip() {
        assert_eq!(StreamType::parse("aggTrade"), Some(StreamType::AggTrade));
        assert_eq!(StreamType::parse("trade"), Some(StreamType::Trade));
        assert_eq!(StreamType::parse("forceOrder"), None);
    }

    #[test]
    fn test_candle_interval_tables() {
        assert_eq!(CandleInterval::OneMinute.table_name(), "candles_1m");
        assert_eq!(CandleInterval::ThirtyMinutes.table_name(), "candles_30m");
        assert_eq!(CandleInterval::OneDay.table_name(), "candles_1d");
    }

    #[test]
    fn test_candle_interval_durations() {
        assert_eq!(CandleInterval::OneMinute.duration_ms(), 60_000);
        assert_eq!(CandleInterval::OneDay.duration_ms(), 86_400_000);
    }

    // =========================================================================
    // ProcessRole Tests
    // =========================================================================

    #[test]
    fn test_process_role_parse() {
        assert_eq!(ProcessRole::parse("ingest"), Some(ProcessRole::Ingest));
        assert_eq!(ProcessRole::parse("AGGREGATE"), Some(ProcessRole::Aggregate));
        assert_eq!(ProcessRole::parse("alert"), Some(ProcessRole::Alert));
        assert_eq!(ProcessRole::parse("backfill"), None);
    }
}
