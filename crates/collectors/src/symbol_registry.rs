//! Venue symbol catalog registry.
//!
//! Refreshes all three venue catalogs concurrently, upserts them, and
//! transitions stored ACTIVE symbols that vanished from a catalog to
//! INACTIVE. Runs daily at a configured UTC hour; a failed run is retried
//! six hours later. Successful runs bump a watch channel so downstream
//! collectors can recompute their subscriptions.

use std::time::Duration;

use anyhow::{Context, Result};
use binance_feed_core::Venue;
use binance_feed_data::{now_ms, SymbolRepository};
use binance_feed_exchange::RestClient;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use tokio::sync::watch;

/// Delay before retrying after a failed refresh.
const FAILURE_RETRY: Duration = Duration::from_secs(6 * 3600);

/// Daily symbol catalog refresher.
pub struct SymbolRegistry {
    rest: RestClient,
    repo: SymbolRepository,
    update_hour_utc: u32,
    updated_tx: watch::Sender<u64>,
}

impl SymbolRegistry {
    /// Creates the registry plus the receiver notified after each
    /// successful refresh (the value is a refresh counter).
    #[must_use]
    pub fn new(
        rest: RestClient,
        repo: SymbolRepository,
        update_hour_utc: u32,
    ) -> (Self, watch::Receiver<u64>) {
        let (updated_tx, updated_rx) = watch::channel(0);
        (
            Self {
                rest,
                repo,
                update_hour_utc,
                updated_tx,
            },
            updated_rx,
        )
    }

    /// One full catalog refresh across all venues.
    ///
    /// # Errors
    /// Returns an error when any venue fetch or store write fails; the next
    /// attempt is the scheduler's concern.
    pub async fn refresh_once(&self) -> Result<()> {
        let (spot, usdm, coinm) = tokio::try_join!(
            self.rest.fetch_exchange_info(Venue::Spot),
            self.rest.fetch_exchange_info(Venue::UsdM),
            self.rest.fetch_exchange_info(Venue::CoinM),
        )
        .context("fetching venue catalogs")?;

        let now = now_ms();
        for (venue, info) in [
            (Venue::Spot, spot),
            (Venue::UsdM, usdm),
            (Venue::CoinM, coinm),
        ] {
            let records: Vec<_> = info
                .symbols
                .iter()
                .filter(|s| venue != Venue::Spot || s.has_spot_permission())
                .map(|s| s.to_record(venue, now))
                .collect();

            self.repo.upsert_batch(&records).await?;

            let live: Vec<String> = records
                .iter()
                .filter(|r| r.is_active())
                .map(|r| r.symbol.clone())
                .collect();
            let retired = self.repo.deactivate_missing(venue, &live, now).await?;

            tracing::info!(
                %venue,
                upserted = records.len(),
                active = live.len(),
                retired,
                "symbol catalog refreshed"
            );
        }

        self.updated_tx.send_modify(|count| *count += 1);
        Ok(())
    }

    /// Refreshes immediately, then keeps the daily schedule until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
            if *shutdown.borrow() {
                return;
            }

            delay = match self.refresh_once().await {
                Ok(()) => next_run_delay(Utc::now(), self.update_hour_utc),
                Err(e) => {
                    tracing::error!("symbol refresh failed, retrying in 6h: {e:#}");
                    FAILURE_RETRY
                }
            };
        }
    }
}

/// Time until the next occurrence of `hour:00:00` UTC strictly after `now`.
#[must_use]
pub fn next_run_delay(now: DateTime<Utc>, hour: u32) -> Duration {
    let today_run = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), hour, 0, 0)
        .single()
        .unwrap_or(now);

    let next = if today_run > now {
        today_run
    } else {
        today_run + chrono::Duration::days(1)
    };

    (next - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, h, m, s).unwrap()
    }

    #[test]
    fn test_next_run_later_today() {
        let delay = next_run_delay(at(0, 30, 0), 1);
        assert_eq!(delay, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_next_run_tomorrow_when_hour_passed() {
        let delay = next_run_delay(at(1, 0, 1), 1);
        assert_eq!(delay, Duration::from_secs(24 * 3600 - 1));
    }

    #[test]
    fn test_next_run_exactly_at_hour_schedules_tomorrow() {
        let delay = next_run_delay(at(1, 0, 0), 1);
        assert_eq!(delay, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_next_run_hour_zero() {
        let delay = next_run_delay(at(23, 0, 0), 0);
        assert_eq!(delay, Duration::from_secs(3600));
    }
}
