pub mod candles;
pub mod historical;
pub mod ranked_assets;
pub mod ratio;
pub mod stream_collector;
pub mod symbol_registry;
pub mod types;

pub use candles::{CandleCollector, CandleCollectorConfig};
pub use historical::{
    resolve_targets, HistoricalCollectorConfig, HistoricalTarget, HistoricalTradeCollector,
    MAX_REST_ITERATIONS,
};
pub use ranked_assets::{
    default_exclusions, load_ranked_assets, RankedAsset, DEFAULT_EXCLUDED_ASSETS,
};
pub use ratio::{RatioCollector, RatioCollectorConfig};
pub use stream_collector::{
    BatchSink, LiquidationCollector, StreamCollector, StreamCollectorConfig, TradeCollector,
};
pub use symbol_registry::{next_run_delay, SymbolRegistry};
pub use types::{CollectorEvent, CollectorStats};
