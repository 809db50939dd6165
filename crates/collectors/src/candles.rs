//! Scheduled OHLCV candle collector.
//!
//! Pulls 1m/30m/1d candles over REST for the tracked symbol set, resuming
//! each `(symbol, interval)` pair from the newest stored open time.

use std::time::Duration;

use anyhow::Result;
use binance_feed_core::{CandleInterval, Venue};
use binance_feed_data::{now_ms, CandleRepository, SymbolRepository};
use binance_feed_exchange::RestClient;
use tokio::sync::watch;

/// Collector knobs.
#[derive(Debug, Clone)]
pub struct CandleCollectorConfig {
    /// Cycle cadence.
    pub interval: Duration,
    /// Venues whose active symbols are tracked.
    pub venues: Vec<Venue>,
    /// Cap on symbols per venue per cycle.
    pub max_symbols: usize,
    /// First-fetch lookback when a pair has no stored candles.
    pub initial_lookback: Duration,
}

impl Default for CandleCollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            venues: vec![Venue::Spot, Venue::UsdM],
            max_symbols: 300,
            initial_lookback: Duration::from_secs(24 * 3600),
        }
    }
}

/// Scheduled candle puller.
pub struct CandleCollector {
    config: CandleCollectorConfig,
    rest: RestClient,
    symbols: SymbolRepository,
    candles: CandleRepository,
}

impl CandleCollector {
    #[must_use]
    pub fn new(
        config: CandleCollectorConfig,
        rest: RestClient,
        symbols: SymbolRepository,
        candles: CandleRepository,
    ) -> Self {
        Self {
            config,
            rest,
            symbols,
            candles,
        }
    }

    /// Runs an immediate cycle, then one per interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.run_cycle(&shutdown).await {
                tracing::error!("candle cycle failed: {e:#}");
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

    /// One pass over every tracked `(symbol, interval)` pair.
    ///
    /// # Errors
    /// Returns an error when symbol listing fails; individual fetch
    /// failures are logged and skipped.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        for &venue in &self.config.venues {
            let symbols = self.symbols.list_active(venue).await?;
            for symbol in symbols.iter().take(self.config.max_symbols) {
                if *shutdown.borrow() {
                    return Ok(());
                }
                for interval in CandleInterval::ALL {
                    if let Err(e) = self.collect_pair(&symbol.symbol, interval, venue).await {
                        tracing::warn!(
                            symbol = %symbol.symbol,
                            interval = interval.as_str(),
                            %venue,
                            "candle fetch failed: {e:#}"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn collect_pair(
        &self,
        symbol: &str,
        interval: CandleInterval,
        venue: Venue,
    ) -> Result<()> {
        let start = match self.candles.latest_open_time(interval, symbol).await? {
            // Start at the newest stored open time so the scan has no gap;
            // the overlapping insert is a no-op.
            Some(latest) => latest,
            None => now_ms() - self.config.initial_lookback.as_millis() as i64,
        };

        let candles = self
            .rest
            .fetch_candles(symbol, interval, venue, Some(start))
            .await?;
        if candles.is_empty() {
            return Ok(());
        }

        // Drop the still-open window; repeated inserts of closed windows are
        // no-ops on the (symbol, open_time) key.
        let cutoff = now_ms();
        let closed: Vec<_> = candles
            .into_iter()
            .filter(|c| c.close_time < cutoff)
            .collect();
        let inserted = self.candles.insert_batch(interval, &closed).await?;

        if inserted > 0 {
            tracing::debug!(
                symbol,
                interval = interval.as_str(),
                inserted,
                "candles stored"
            );
        }
        Ok(())
    }
}
