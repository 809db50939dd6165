//! Store repositories.
//!
//! Each repository provides typed access to a table (or table family) with
//! idempotent batch writes and the queries its consumers need. All writes go
//! through the store's serialized write transaction.

pub mod agg_trade_repo;
pub mod alert_repo;
pub mod candle_repo;
pub mod cvd_repo;
pub mod liquidation_repo;
pub mod processing_state_repo;
pub mod ratio_repo;
pub mod symbol_repo;
pub mod trade_repo;

pub use agg_trade_repo::AggTradeRepository;
pub use alert_repo::AlertRepository;
pub use candle_repo::CandleRepository;
pub use cvd_repo::CvdRepository;
pub use liquidation_repo::LiquidationRepository;
pub use processing_state_repo::{ProcessingState, ProcessingStateRepository};
pub use ratio_repo::RatioRepository;
pub use symbol_repo::SymbolRepository;
pub use trade_repo::TradeRepository;
