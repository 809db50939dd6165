//! Top-trader long/short ratio samples.

use serde::{Deserialize, Serialize};

/// Which ratio series a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatioSeries {
    /// Long/short ratio by position size.
    Position,
    /// Long/short ratio by account count.
    Account,
}

impl RatioSeries {
    /// Backing table for the series.
    #[must_use]
    pub const fn table_name(&self) -> &'static str {
        match self {
            Self::Position => "top_trader_positions",
            Self::Account => "top_trader_accounts",
        }
    }
}

/// One ratio sample, keyed on `(symbol, timestamp)` within its series table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RatioRecord {
    pub symbol: String,
    /// Sample time (ms).
    pub timestamp: i64,
    pub long_short_ratio: f64,
    pub long_account: f64,
    pub short_account: f64,
}
