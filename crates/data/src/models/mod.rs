//! Data models for the acquisition pipeline.
//!
//! Prices and quantities are `f64` (REAL columns); timestamps are Unix
//! milliseconds. Models derive `sqlx::FromRow` for database compatibility.

pub mod agg_trade;
pub mod alert;
pub mod candle;
pub mod cvd;
pub mod liquidation;
pub mod ratio;
pub mod symbol;
pub mod trade;

pub use agg_trade::{AggTradeCheckpoint, AggTradeRecord};
pub use alert::{AlertQueueRecord, CvdAlertPayload, TriggerSource, ALERT_TYPE_CVD};
pub use candle::CandleRecord;
pub use cvd::CvdRecord;
pub use liquidation::LiquidationRecord;
pub use ratio::{RatioRecord, RatioSeries};
pub use symbol::SymbolRecord;
pub use trade::{TradeRecord, TradeRow, TradeStreamFilter};
