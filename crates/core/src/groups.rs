//! CVD aggregator group configuration.
//!
//! Groups are loaded from the `BINANCE_CVD_GROUPS` environment variable as a
//! JSON array; when the variable is absent a built-in default set is used.
//! An aggregator id is a logical symbol, distinct from any exchange symbol.

use serde::{Deserialize, Serialize};

use crate::types::{StreamType, Venue};

/// One exchange stream feeding an aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSpec {
    /// Exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Market the stream is read from.
    pub market_type: Venue,
    /// Stream kind; defaults to the aggregated trade stream.
    #[serde(default)]
    pub stream_type: Option<StreamType>,
}

impl StreamSpec {
    /// Effective stream type with the aggTrade default applied.
    #[must_use]
    pub fn effective_stream_type(&self) -> StreamType {
        self.stream_type.unwrap_or(StreamType::AggTrade)
    }

    /// Returns true when a persisted trade row matches this stream.
    #[must_use]
    pub fn matches(&self, symbol: &str, venue: Venue, stream_type: StreamType) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol)
            && self.market_type == venue
            && self.effective_stream_type() == stream_type
    }
}

/// One CVD aggregator: a named group of streams producing a single series.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorGroup {
    /// Logical symbol identifying the series (not an exchange symbol).
    pub id: String,
    /// Optional human-readable name used in alert text.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Streams whose trades feed the series.
    pub streams: Vec<StreamSpec>,
    /// Whether this aggregator may emit alerts.
    #[serde(default = "default_alerts_enabled")]
    pub alerts_enabled: bool,
}

const fn default_alerts_enabled() -> bool {
    true
}

impl AggregatorGroup {
    /// Name shown in alert messages.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Parses a JSON aggregator-group array.
///
/// # Errors
/// Returns an error on malformed JSON, an empty group list, a group without
/// streams, or a duplicate aggregator id. Unknown market types fail during
/// deserialization.
pub fn parse_groups(json: &str) -> anyhow::Result<Vec<AggregatorGroup>> {
    let groups: Vec<AggregatorGroup> =
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("invalid CVD group JSON: {e}"))?;

    if groups.is_empty() {
        anyhow::bail!("CVD group list is empty");
    }

    let mut seen = std::collections::HashSet::new();
    for group in &groups {
        if group.streams.is_empty() {
            anyhow::bail!("CVD group '{}' declares no streams", group.id);
        }
        if !seen.insert(group.id.as_str()) {
            anyhow::bail!("duplicate CVD group id '{}'", group.id);
        }
    }

    Ok(groups)
}

/// Built-in aggregator set used when `BINANCE_CVD_GROUPS` is not set.
#[must_use]
pub fn default_groups() -> Vec<AggregatorGroup> {
    vec![
        AggregatorGroup {
            id: "BTC".to_string(),
            display_name: Some("Bitcoin".to_string()),
            streams: vec![
                StreamSpec {
                    symbol: "BTCUSDT".to_string(),
                    market_type: Venue::Spot,
                    stream_type: Some(StreamType::AggTrade),
                },
                StreamSpec {
                    symbol: "BTCUSDT".to_string(),
                    market_type: Venue::UsdM,
                    stream_type: Some(StreamType::AggTrade),
                },
            ],
            alerts_enabled: true,
        },
        AggregatorGroup {
            id: "ETH".to_string(),
            display_name: Some("Ethereum".to_string()),
            streams: vec![
                StreamSpec {
                    symbol: "ETHUSDT".to_string(),
                    market_type: Venue::Spot,
                    stream_type: Some(StreamType::AggTrade),
                },
                StreamSpec {
                    symbol: "ETHUSDT".to_string(),
                    market_type: Venue::UsdM,
                    stream_type: Some(StreamType::AggTrade),
                },
            ],
            alerts_enabled: true,
        },
    ]
}
