//! Alert queue dispatcher.
//!
//! Drains pending queue entries in `(timestamp, id)` order and pushes them
//! through the external sink. Entries that already spent their attempt
//! budget are marked terminal with the error preserved; a successful
//! dispatch marks the entry processed and clears the error. Delivery is
//! at-least-once: an entry only leaves the pending set by success or by
//! exhausting its attempts.

use std::time::Duration;

use anyhow::Result;
use binance_feed_data::{AlertQueueRecord, AlertRepository};
use tokio::sync::{mpsc, watch};

use crate::discord::AlertSink;

/// Error recorded on entries that ran out of attempts before dispatch.
const RETRY_LIMIT_ERROR: &str = "Retry limit reached";

/// Dispatcher knobs.
#[derive(Debug, Clone)]
pub struct AlertDispatcherConfig {
    /// Idle delay between queue polls.
    pub poll_interval: Duration,
    /// Entries pulled per poll.
    pub batch_size: u32,
    /// Attempt budget per entry.
    pub max_attempts: u32,
}

impl Default for AlertDispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 20,
            max_attempts: 5,
        }
    }
}

/// Dispatch lifecycle events.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Sent {
        id: i64,
        symbol: String,
    },
    Failed {
        id: i64,
        symbol: String,
        error: String,
        terminal: bool,
    },
}

/// Queue drain loop over an [`AlertSink`].
pub struct AlertDispatcher<S> {
    config: AlertDispatcherConfig,
    queue: AlertRepository,
    sink: S,
    events_tx: Option<mpsc::Sender<AlertEvent>>,
}

impl<S: AlertSink> AlertDispatcher<S> {
    #[must_use]
    pub fn new(config: AlertDispatcherConfig, queue: AlertRepository, sink: S) -> Self {
        Self {
            config,
            queue,
            sink,
            events_tx: None,
        }
    }

    /// Sets the dispatch event channel.
    #[must_use]
    pub fn with_event_channel(mut self, tx: mpsc::Sender<AlertEvent>) -> Self {
        self.events_tx = Some(tx);
        self
    }

    /// Poll loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.process_batch().await {
                Ok(handled) => {
                    if handled > 0 {
                        tracing::debug!(handled, "alert batch processed");
                    }
                }
                Err(e) => tracing::error!("alert batch failed: {e:#}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("alert dispatcher stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One drain pass. Returns the number of entries handled.
    ///
    /// # Errors
    /// Returns an error when the queue itself is unreadable; per-entry sink
    /// failures are recorded on the entry instead.
    pub async fn process_batch(&self) -> Result<usize> {
        let entries = self.queue.get_pending(self.config.batch_size).await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let max_attempts = i64::from(self.config.max_attempts);
        let (exhausted, pending): (Vec<AlertQueueRecord>, Vec<AlertQueueRecord>) = entries
            .into_iter()
            .partition(|e| e.attempt_count >= max_attempts);

        for entry in exhausted {
            tracing::warn!(id = entry.id, symbol = %entry.symbol, "alert retry limit reached");
            self.queue.mark_failure(entry.id, RETRY_LIMIT_ERROR).await?;
            self.queue.mark_processed(entry.id, false).await?;
            self.emit(AlertEvent::Failed {
                id: entry.id,
                symbol: entry.symbol,
                error: RETRY_LIMIT_ERROR.to_string(),
                terminal: true,
            })
            .await;
        }

        let mut handled = 0;
        for entry in pending {
            self.dispatch_entry(&entry).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn dispatch_entry(&self, entry: &AlertQueueRecord) -> Result<()> {
        self.queue.mark_attempt(entry.id).await?;

        let payload = match entry.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                // A payload that cannot be decoded can never succeed.
                tracing::error!(id = entry.id, "undecodable alert payload: {e:#}");
                self.queue
                    .mark_failure(entry.id, &format!("undecodable payload: {e}"))
                    .await?;
                self.queue.mark_processed(entry.id, false).await?;
                self.emit(AlertEvent::Failed {
                    id: entry.id,
                    symbol: entry.symbol.clone(),
                    error: "undecodable payload".to_string(),
                    terminal: true,
                })
                .await;
                return Ok(());
            }
        };

        match self.sink.send_cvd_alert(&payload).await {
            Ok(()) => {
                self.queue.mark_processed(entry.id, true).await?;
                tracing::info!(id = entry.id, symbol = %entry.symbol, "alert sent");
                self.emit(AlertEvent::Sent {
                    id: entry.id,
                    symbol: entry.symbol.clone(),
                })
                .await;
            }
            Err(e) => {
                let message = e.to_string();
                self.queue.mark_failure(entry.id, &message).await?;

                // This attempt was number attempt_count + 1.
                let terminal = entry.attempt_count + 1 >= i64::from(self.config.max_attempts);
                if terminal {
                    self.queue.mark_processed(entry.id, false).await?;
                }
                tracing::warn!(
                    id = entry.id,
                    symbol = %entry.symbol,
                    terminal,
                    "alert dispatch failed: {message}"
                );
                self.emit(AlertEvent::Failed {
                    id: entry.id,
                    symbol: entry.symbol.clone(),
                    error: message,
                    terminal,
                })
                .await;
            }
        }
        Ok(())
    }

    async fn emit(&self, event: AlertEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use binance_feed_data::{CvdAlertPayload, Database, TriggerSource, ALERT_TYPE_CVD};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Sink that fails its first `failures` calls, recording every payload.
    #[derive(Clone, Default)]
    struct MockSink {
        calls: Arc<Mutex<Vec<String>>>,
        failures_left: Arc<AtomicU32>,
    }

    #[async_trait]
    impl AlertSink for MockSink {
        async fn send_cvd_alert(&self, payload: &CvdAlertPayload) -> Result<()> {
            self.calls.lock().unwrap().push(payload.symbol.clone());
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("webhook unavailable");
            }
            Ok(())
        }
    }

    fn payload(symbol: &str, timestamp: i64) -> CvdAlertPayload {
        CvdAlertPayload {
            alert_type: ALERT_TYPE_CVD.to_string(),
            symbol: symbol.to_string(),
            display_name: None,
            timestamp,
            trigger_source: TriggerSource::Delta,
            trigger_z_score: 9.0,
            z_score: 3.0,
            delta: 100.0,
            delta_z_score: 9.0,
            threshold: 2.0,
            raw_threshold: 2.0_f64.exp(),
            log_trigger_z_score: 9.0_f64.ln(),
            raw_trigger_z_score: 9.0,
            cumulative_value: 500.0,
        }
    }

    async fn test_setup() -> (tempfile::TempDir, Database, AlertRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("alerts.db")).await.unwrap();
        let repo = AlertRepository::new(db.clone());
        (dir, db, repo)
    }

    #[tokio::test]
    async fn test_success_marks_processed_and_clears_error() {
        let (_dir, _db, repo) = test_setup().await;
        let id = repo.enqueue(&payload("BTC", 1_000)).await.unwrap();
        repo.mark_failure(id, "older failure").await.unwrap();

        let sink = MockSink::default();
        let dispatcher =
            AlertDispatcher::new(AlertDispatcherConfig::default(), repo.clone(), sink.clone());

        assert_eq!(dispatcher.process_batch().await.unwrap(), 1);

        let entry = repo.get(id).await.unwrap().unwrap();
        assert!(!entry.is_pending());
        assert!(entry.last_error.is_none());
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(sink.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_records_error_and_retries_next_pass() {
        let (_dir, _db, repo) = test_setup().await;
        let id = repo.enqueue(&payload("BTC", 1_000)).await.unwrap();

        let sink = MockSink::default();
        sink.failures_left.store(1, Ordering::SeqCst);
        let dispatcher =
            AlertDispatcher::new(AlertDispatcherConfig::default(), repo.clone(), sink.clone());

        dispatcher.process_batch().await.unwrap();

        let entry = repo.get(id).await.unwrap().unwrap();
        assert!(entry.is_pending());
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.last_error.as_deref(), Some("webhook unavailable"));

        // Next pass succeeds.
        dispatcher.process_batch().await.unwrap();
        let entry = repo.get(id).await.unwrap().unwrap();
        assert!(!entry.is_pending());
        assert_eq!(entry.attempt_count, 2);
        assert_eq!(sink.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_attempt_budget_bounds_sink_invocations() {
        let (_dir, _db, repo) = test_setup().await;
        let id = repo.enqueue(&payload("BTC", 1_000)).await.unwrap();

        let sink = MockSink::default();
        sink.failures_left.store(u32::MAX, Ordering::SeqCst);
        let config = AlertDispatcherConfig {
            max_attempts: 3,
            ..AlertDispatcherConfig::default()
        };
        let dispatcher = AlertDispatcher::new(config, repo.clone(), sink.clone());

        // Run plenty of passes; the sink must be invoked exactly 3 times.
        for _ in 0..6 {
            dispatcher.process_batch().await.unwrap();
        }

        assert_eq!(sink.calls.lock().unwrap().len(), 3);
        let entry = repo.get(id).await.unwrap().unwrap();
        assert!(!entry.is_pending());
        assert_eq!(entry.attempt_count, 3);
        assert_eq!(entry.last_error.as_deref(), Some("webhook unavailable"));
    }

    #[tokio::test]
    async fn test_pre_exhausted_entries_are_marked_terminal_without_dispatch() {
        let (_dir, _db, repo) = test_setup().await;
        let id = repo.enqueue(&payload("BTC", 1_000)).await.unwrap();
        // Simulate attempts burned by an earlier deployment.
        for _ in 0..5 {
            repo.mark_attempt(id).await.unwrap();
        }

        let sink = MockSink::default();
        let dispatcher =
            AlertDispatcher::new(AlertDispatcherConfig::default(), repo.clone(), sink.clone());
        dispatcher.process_batch().await.unwrap();

        assert!(sink.calls.lock().unwrap().is_empty());
        let entry = repo.get(id).await.unwrap().unwrap();
        assert!(!entry.is_pending());
        assert_eq!(entry.last_error.as_deref(), Some("Retry limit reached"));
    }

    #[tokio::test]
    async fn test_drain_order_is_timestamp_then_id() {
        let (_dir, _db, repo) = test_setup().await;
        repo.enqueue(&payload("LATE", 3_000)).await.unwrap();
        repo.enqueue(&payload("EARLY", 1_000)).await.unwrap();
        repo.enqueue(&payload("MID", 2_000)).await.unwrap();

        let sink = MockSink::default();
        let dispatcher =
            AlertDispatcher::new(AlertDispatcherConfig::default(), repo, sink.clone());
        dispatcher.process_batch().await.unwrap();

        assert_eq!(*sink.calls.lock().unwrap(), vec!["EARLY", "MID", "LATE"]);
    }

    #[tokio::test]
    async fn test_event_channel_reports_outcomes() {
        let (_dir, _db, repo) = test_setup().await;
        repo.enqueue(&payload("BTC", 1_000)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let sink = MockSink::default();
        let dispatcher = AlertDispatcher::new(AlertDispatcherConfig::default(), repo, sink)
            .with_event_channel(tx);
        dispatcher.process_batch().await.unwrap();

        match rx.recv().await.unwrap() {
            AlertEvent::Sent { symbol, .. } => assert_eq!(symbol, "BTC"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
