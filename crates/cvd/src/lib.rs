pub mod aggregator;
pub mod stats;
pub mod worker;

pub use aggregator::CvdAggregator;
pub use stats::{signed_log, RollingWindow};
pub use worker::{CvdWorker, CvdWorkerConfig, PROCESS_NAME};
