//! Buffered streaming collectors.
//!
//! Trade and liquidation collectors share one shape: events from the push
//! client land in a bounded buffer that flushes every `flush_interval` and
//! immediately at `max_buffer_size`. A flush swaps the buffer out; on a
//! store failure the batch is re-prepended in front of anything that arrived
//! meanwhile, so delivery is at-least-once with order preserved.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use binance_feed_data::{
    now_ms, LiquidationRecord, LiquidationRepository, TradeRecord, TradeRepository,
};
use tokio::sync::{mpsc, watch};

use crate::types::{CollectorEvent, CollectorStats};

/// Destination of a collector's flushes.
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    /// Persists one batch; returns the number of newly inserted rows.
    async fn write_batch(&self, batch: &[T]) -> Result<u64>;
}

#[async_trait]
impl BatchSink<TradeRecord> for TradeRepository {
    async fn write_batch(&self, batch: &[TradeRecord]) -> Result<u64> {
        self.insert_batch(batch).await
    }
}

#[async_trait]
impl BatchSink<LiquidationRecord> for LiquidationRepository {
    async fn write_batch(&self, batch: &[LiquidationRecord]) -> Result<u64> {
        self.insert_batch(batch).await
    }
}

/// Buffering knobs.
#[derive(Debug, Clone)]
pub struct StreamCollectorConfig {
    /// Name used in events and logs, e.g. `trades`.
    pub source: String,
    /// Periodic flush cadence.
    pub flush_interval: Duration,
    /// Buffer size triggering an immediate flush.
    pub max_buffer_size: usize,
}

impl StreamCollectorConfig {
    /// Defaults for the trade collector.
    #[must_use]
    pub fn trades() -> Self {
        Self {
            source: "trades".to_string(),
            flush_interval: Duration::from_secs(5),
            max_buffer_size: 1000,
        }
    }

    /// Defaults for the liquidation collector.
    #[must_use]
    pub fn liquidations() -> Self {
        Self {
            source: "liquidations".to_string(),
            flush_interval: Duration::from_secs(5),
            max_buffer_size: 500,
        }
    }
}

/// Generic buffered collector; instantiated for trades and liquidations.
pub struct StreamCollector<T, S> {
    config: StreamCollectorConfig,
    sink: S,
    buffer: Vec<T>,
    stats: CollectorStats,
    events_tx: Option<mpsc::Sender<CollectorEvent>>,
}

/// Trade collector over the trade repository.
pub type TradeCollector = StreamCollector<TradeRecord, TradeRepository>;

/// Liquidation collector over the liquidation repository.
pub type LiquidationCollector = StreamCollector<LiquidationRecord, LiquidationRepository>;

impl<T, S> StreamCollector<T, S>
where
    T: Send,
    S: BatchSink<T>,
{
    #[must_use]
    pub fn new(config: StreamCollectorConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            buffer: Vec::new(),
            stats: CollectorStats::default(),
            events_tx: None,
        }
    }

    /// Sets the monitoring event channel.
    #[must_use]
    pub fn with_event_channel(mut self, tx: mpsc::Sender<CollectorEvent>) -> Self {
        self.events_tx = Some(tx);
        self
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    /// Buffered record count (exposed for tests).
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consumes events until the input channel closes or shutdown fires,
    /// then final-flushes.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<T>, mut shutdown: watch::Receiver<bool>) {
        let mut flush_timer = tokio::time::interval(self.config.flush_interval);
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        flush_timer.tick().await; // discard the immediate tick

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            self.buffer.push(event);
                            self.stats.record_collected();
                            if self.buffer.len() >= self.config.max_buffer_size {
                                self.flush().await;
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_timer.tick() => {
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.flush().await;
        tracing::info!(source = %self.config.source, "collector stopped");
    }

    /// One flush pass: swap the buffer out, write it, and on failure put it
    /// back in front of whatever arrived since.
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.buffer);
        match self.sink.write_batch(&batch).await {
            Ok(inserted) => {
                self.stats.flushed(inserted);
                tracing::debug!(
                    source = %self.config.source,
                    buffered = batch.len(),
                    inserted,
                    "flushed collector buffer"
                );
                self.emit(CollectorEvent::Saved {
                    source: self.config.source.clone(),
                    count: batch.len(),
                })
                .await;
            }
            Err(e) => {
                self.stats.error_occurred();
                tracing::error!(source = %self.config.source, "flush failed: {e:#}");
                self.emit(CollectorEvent::Error {
                    source: self.config.source.clone(),
                    error: e.to_string(),
                })
                .await;

                // Order preserved: failed batch first, new arrivals after.
                let mut restored = batch;
                restored.append(&mut self.buffer);
                self.buffer = restored;
            }
        }
    }

    async fn emit(&self, event: CollectorEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Emits a heartbeat event (driven by the supervisor).
    pub async fn heartbeat(&self) {
        self.emit(CollectorEvent::Heartbeat {
            source: self.config.source.clone(),
            timestamp: now_ms(),
            records_collected: self.stats.records_collected,
        })
        .await;
    }
}
