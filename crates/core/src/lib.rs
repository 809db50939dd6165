pub mod config;
pub mod groups;
pub mod types;

pub use config::{AppConfig, ConfigError, MIN_POLL_INTERVAL_MS};
pub use groups::{default_groups, parse_groups, AggregatorGroup, StreamSpec};
pub use types::{CandleInterval, ProcessRole, StreamType, TradeSide, TradeSource, Venue};
