//! Exchange-info symbol catalog decoding.

use binance_feed_core::Venue;
use binance_feed_data::models::symbol::{STATUS_ACTIVE, STATUS_INACTIVE};
use binance_feed_data::SymbolRecord;
use serde::Deserialize;

use crate::events::json_f64;

/// Decoded `exchangeInfo` response.
#[derive(Debug, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<ExchangeSymbol>,
}

/// One catalog entry as the exchange reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSymbol {
    pub symbol: String,
    /// Spot and USDT-margined status field.
    #[serde(default)]
    pub status: Option<String>,
    /// Coin-margined venues report `contractStatus` instead.
    #[serde(default)]
    pub contract_status: Option<String>,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub permission_sets: Vec<Vec<String>>,
    /// Legacy spot eligibility flag.
    #[serde(default)]
    pub is_spot_trading_allowed: Option<bool>,
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<i64>,
    #[serde(default)]
    pub onboard_date: Option<i64>,
    #[serde(default)]
    pub filters: Vec<serde_json::Value>,
}

impl ExchangeSymbol {
    /// Exchange status string, whichever field the venue populates.
    #[must_use]
    pub fn effective_status(&self) -> &str {
        self.status
            .as_deref()
            .or(self.contract_status.as_deref())
            .unwrap_or("")
    }

    /// Spot eligibility: a `SPOT` permission directly, within any permission
    /// set, or the legacy flag.
    #[must_use]
    pub fn has_spot_permission(&self) -> bool {
        self.permissions.iter().any(|p| p == "SPOT")
            || self
                .permission_sets
                .iter()
                .any(|set| set.iter().any(|p| p == "SPOT"))
            || self.is_spot_trading_allowed == Some(true)
    }

    /// Reads one numeric field out of the typed filter list.
    #[must_use]
    pub fn filter_value(&self, filter_type: &str, field: &str) -> Option<f64> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
            .and_then(|f| f.get(field))
            .and_then(json_f64)
    }

    /// Converts to a storage record; `TRADING` maps to ACTIVE, anything
    /// else to INACTIVE.
    #[must_use]
    pub fn to_record(&self, venue: Venue, now_ms: i64) -> SymbolRecord {
        let status = if self.effective_status() == "TRADING" {
            STATUS_ACTIVE
        } else {
            STATUS_INACTIVE
        };

        SymbolRecord {
            symbol: self.symbol.clone(),
            venue: venue.as_str().to_string(),
            base_asset: self.base_asset.clone(),
            quote_asset: self.quote_asset.clone(),
            status: status.to_string(),
            contract_type: self.contract_type.clone().filter(|c| !c.is_empty()),
            delivery_date: self.delivery_date,
            onboard_date: self.onboard_date,
            tick_size: self.filter_value("PRICE_FILTER", "tickSize"),
            step_size: self.filter_value("LOT_SIZE", "stepSize"),
            min_notional: self
                .filter_value("MIN_NOTIONAL", "minNotional")
                .or_else(|| self.filter_value("NOTIONAL", "minNotional")),
            updated_at: now_ms,
        }
    }
}
