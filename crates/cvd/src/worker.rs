//! CVD aggregation worker.
//!
//! Polls new trade rows by rowid cursor per aggregator, feeds them through
//! the incremental statistics, persists series points and the advanced
//! cursor, and enqueues alert payloads that survive the suppression check.
//! The loop is a single task made explicitly non-reentrant with a
//! `processing` flag, matching the store's single-writer discipline.

use std::time::Duration;

use anyhow::{Context, Result};
use binance_feed_core::groups::AggregatorGroup;
use binance_feed_data::{
    now_ms, AlertRepository, CvdAlertPayload, CvdRepository, Database,
    ProcessingStateRepository, TradeRepository, ALERT_TYPE_CVD,
};
use tokio::sync::watch;

use crate::aggregator::CvdAggregator;

/// Processing-state process name; the key is the aggregator id.
pub const PROCESS_NAME: &str = "cvd_aggregator";

/// Worker knobs.
#[derive(Debug, Clone)]
pub struct CvdWorkerConfig {
    /// Trade rows fetched per batch.
    pub batch_size: u32,
    /// Idle delay between polls.
    pub poll_interval: Duration,
    /// Minimum spacing between alerts of one aggregator.
    pub suppression_window: Duration,
    /// Rolling statistics horizon.
    pub history_window: Duration,
    /// Log-domain alert threshold.
    pub threshold_log: f64,
    /// Global alert switch; individual aggregators may also opt out.
    pub alerts_enabled: bool,
}

impl Default for CvdWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            poll_interval: Duration::from_secs(2),
            suppression_window: Duration::from_secs(30 * 60),
            history_window: Duration::from_secs(72 * 3600),
            threshold_log: 2.0,
            alerts_enabled: true,
        }
    }
}

struct AggregatorRuntime {
    aggregator: CvdAggregator,
    last_row_id: i64,
}

/// The aggregation worker.
pub struct CvdWorker {
    config: CvdWorkerConfig,
    trades: TradeRepository,
    cvd: CvdRepository,
    state: ProcessingStateRepository,
    alerts: AlertRepository,
    aggregators: Vec<AggregatorRuntime>,
    processing: bool,
}

impl CvdWorker {
    /// Builds the worker: one aggregator per group, cursor restored from
    /// processing state, rolling window warm-started from the persisted
    /// series.
    ///
    /// # Errors
    /// Returns an error when state or series reads fail.
    pub async fn new(
        config: CvdWorkerConfig,
        db: Database,
        groups: Vec<AggregatorGroup>,
    ) -> Result<Self> {
        let trades = TradeRepository::new(db.clone());
        let cvd = CvdRepository::new(db.clone());
        let state = ProcessingStateRepository::new(db.clone());
        let alerts = AlertRepository::new(db);

        let history_ms = config.history_window.as_millis() as i64;
        let mut aggregators = Vec::with_capacity(groups.len());
        for group in groups {
            let id = group.id.clone();
            let mut aggregator = CvdAggregator::new(group, history_ms, config.threshold_log);

            let warm_records = cvd.get_since(&id, now_ms() - history_ms).await?;
            aggregator.warm_start(&warm_records);

            let last_row_id = state
                .get(PROCESS_NAME, &id)
                .await?
                .map_or(0, |s| s.last_row_id);

            tracing::info!(
                aggregator = %id,
                last_row_id,
                warm_points = warm_records.len(),
                "aggregator initialized"
            );
            aggregators.push(AggregatorRuntime {
                aggregator,
                last_row_id,
            });
        }

        Ok(Self {
            config,
            trades,
            cvd,
            state,
            alerts,
            aggregators,
            processing: false,
        })
    }

    /// Poll loop: process all aggregators, idle, repeat until shutdown.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.process_all(&shutdown).await {
                Ok(processed) => {
                    if processed > 0 {
                        tracing::debug!(trades = processed, "aggregation pass complete");
                    }
                }
                Err(e) => tracing::error!("aggregation pass failed: {e:#}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("cvd worker stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every aggregator in declared order. Returns the number
    /// of trades consumed.
    ///
    /// # Errors
    /// Returns an error when a store operation fails; the cursor only
    /// advances past batches that were fully persisted.
    pub async fn process_all(&mut self, shutdown: &watch::Receiver<bool>) -> Result<u64> {
        // Non-reentrant: a pass that is still running wins.
        if self.processing {
            return Ok(0);
        }
        self.processing = true;
        let result = self.process_all_inner(shutdown).await;
        self.processing = false;
        result
    }

    async fn process_all_inner(&mut self, shutdown: &watch::Receiver<bool>) -> Result<u64> {
        let batch_size = self.config.batch_size;
        let mut total = 0u64;

        for runtime in &mut self.aggregators {
            loop {
                if *shutdown.borrow() {
                    return Ok(total);
                }

                let rows = self
                    .trades
                    .get_since_row_id(
                        runtime.aggregator.filters(),
                        runtime.last_row_id,
                        batch_size,
                    )
                    .await
                    .with_context(|| {
                        format!("cursoring trades for {}", runtime.aggregator.id())
                    })?;
                if rows.is_empty() {
                    break;
                }

                let mut records = Vec::with_capacity(rows.len());
                let mut candidates: Vec<CvdAlertPayload> = Vec::new();
                for row in &rows {
                    let (record, alert) = runtime.aggregator.process_trade(&row.trade);
                    records.push(record);
                    if let Some(payload) = alert {
                        if self.config.alerts_enabled {
                            candidates.push(payload);
                        }
                    }
                }

                self.cvd.upsert_batch(&records).await?;

                for payload in candidates {
                    Self::maybe_enqueue(
                        &self.alerts,
                        self.config.suppression_window,
                        payload,
                    )
                    .await?;
                }

                let batch_len = rows.len();
                let Some(last) = rows.last() else { break };
                runtime.last_row_id = last.row_id;
                self.state
                    .upsert(
                        PROCESS_NAME,
                        runtime.aggregator.id(),
                        last.row_id,
                        last.trade.timestamp,
                    )
                    .await?;

                total += batch_len as u64;
                if batch_len < batch_size as usize {
                    break;
                }
            }
        }
        Ok(total)
    }

    /// Enqueues unless a recent or pending alert for the same
    /// `(alert_type, aggregator)` vetoes it.
    async fn maybe_enqueue(
        alerts: &AlertRepository,
        suppression_window: Duration,
        payload: CvdAlertPayload,
    ) -> Result<bool> {
        let since = now_ms() - suppression_window.as_millis() as i64;
        if alerts
            .has_recent_alert_or_pending(ALERT_TYPE_CVD, &payload.symbol, since)
            .await?
        {
            tracing::debug!(aggregator = %payload.symbol, "alert suppressed");
            return Ok(false);
        }

        let id = alerts.enqueue(&payload).await?;
        tracing::info!(
            aggregator = %payload.symbol,
            queue_id = id,
            trigger = payload.trigger_source.as_str(),
            z = payload.trigger_z_score,
            "alert enqueued"
        );
        Ok(true)
    }
}
