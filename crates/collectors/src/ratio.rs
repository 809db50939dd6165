//! Scheduled top-trader ratio collector.
//!
//! Every interval, walks the active USDT-margined perpetuals in order and
//! pulls the position-ratio then account-ratio series for each, spacing the
//! calls out so one cycle never bursts the endpoint. Samples older than the
//! retention horizon are dropped before persistence.

use std::time::Duration;

use anyhow::Result;
use binance_feed_core::Venue;
use binance_feed_data::{now_ms, RatioRecord, RatioRepository, RatioSeries, SymbolRepository};
use binance_feed_exchange::RestClient;
use tokio::sync::watch;

/// Collector knobs.
#[derive(Debug, Clone)]
pub struct RatioCollectorConfig {
    /// Cycle cadence.
    pub interval: Duration,
    /// Delay between consecutive REST calls within a cycle.
    pub request_delay: Duration,
    /// Attempts per series fetch.
    pub max_retries: u32,
    /// Delay between fetch attempts.
    pub retry_delay: Duration,
    /// Samples older than this are discarded before persistence.
    pub retention: Duration,
}

impl Default for RatioCollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            request_delay: Duration::from_secs(3),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Scheduled per-symbol ratio puller.
pub struct RatioCollector {
    config: RatioCollectorConfig,
    rest: RestClient,
    symbols: SymbolRepository,
    ratios: RatioRepository,
}

impl RatioCollector {
    #[must_use]
    pub fn new(
        config: RatioCollectorConfig,
        rest: RestClient,
        symbols: SymbolRepository,
        ratios: RatioRepository,
    ) -> Self {
        Self {
            config,
            rest,
            symbols,
            ratios,
        }
    }

    /// Runs an immediate cycle, then one per interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.run_cycle(&shutdown).await {
                tracing::error!("ratio cycle failed: {e:#}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// One pass over the active perpetuals.
    ///
    /// # Errors
    /// Returns an error when the symbol listing fails; per-symbol fetch
    /// failures are logged and skipped.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let symbols: Vec<String> = self
            .symbols
            .list_active(Venue::UsdM)
            .await?
            .into_iter()
            .filter(binance_feed_data::SymbolRecord::is_perpetual_or_unspecified)
            .map(|s| s.symbol)
            .collect();

        tracing::debug!(symbols = symbols.len(), "ratio cycle starting");

        for symbol in symbols {
            if *shutdown.borrow() {
                return Ok(());
            }

            self.collect_series(&symbol, RatioSeries::Position).await;
            tokio::time::sleep(self.config.request_delay).await;
            self.collect_series(&symbol, RatioSeries::Account).await;
            tokio::time::sleep(self.config.request_delay).await;
        }
        Ok(())
    }

    async fn collect_series(&self, symbol: &str, series: RatioSeries) {
        match self.fetch_with_retry(symbol, series).await {
            Ok(samples) => {
                let cutoff = now_ms() - self.config.retention.as_millis() as i64;
                let fresh = filter_fresh(samples, cutoff);
                if fresh.is_empty() {
                    return;
                }
                if let Err(e) = self.ratios.insert_batch(series, &fresh).await {
                    tracing::error!(symbol, ?series, "ratio persist failed: {e:#}");
                }
            }
            Err(e) => {
                tracing::warn!(symbol, ?series, "ratio fetch failed: {e:#}");
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        symbol: &str,
        series: RatioSeries,
    ) -> Result<Vec<RatioRecord>> {
        let mut last_error = None;
        for attempt in 1..=self.config.max_retries {
            let result = match series {
                RatioSeries::Position => self.rest.fetch_top_trader_positions(symbol).await,
                RatioSeries::Account => self.rest.fetch_top_trader_accounts(symbol).await,
            };
            match result {
                Ok(samples) => return Ok(samples),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
    }
}

/// Drops samples at or before the retention cutoff.
fn filter_fresh(samples: Vec<RatioRecord>, cutoff_ms: i64) -> Vec<RatioRecord> {
    samples
        .into_iter()
        .filter(|s| s.timestamp > cutoff_ms)
        .collect()
}
