pub mod asset_store;
pub mod backup;
pub mod db;
pub mod migrations;
pub mod models;
pub mod repositories;

pub use asset_store::AssetStoreManager;
pub use backup::{BackupConfig, BackupScheduler};
pub use db::{now_ms, Database};
pub use models::{
    AggTradeCheckpoint, AggTradeRecord, AlertQueueRecord, CandleRecord, CvdAlertPayload,
    CvdRecord, LiquidationRecord, RatioRecord, RatioSeries, SymbolRecord, TradeRecord, TradeRow,
    TradeStreamFilter, TriggerSource, ALERT_TYPE_CVD,
};
pub use repositories::{
    AggTradeRepository, AlertRepository, CandleRepository, CvdRepository, LiquidationRepository,
    ProcessingState, ProcessingStateRepository, RatioRepository, SymbolRepository, TradeRepository,
};
