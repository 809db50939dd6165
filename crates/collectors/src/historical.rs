//! Resumable historical aggregated-trade collector.
//!
//! Runs a cycle at startup and then on a fixed interval. Each cycle resolves
//! its target list from the ranked-asset universe and the stored symbol
//! catalogs, then pulls pages of aggregated trades per target into that
//! asset's own store, advancing a trade-time cursor persisted implicitly by
//! the newest stored row.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use binance_feed_core::Venue;
use binance_feed_data::{
    now_ms, AggTradeRecord, AggTradeRepository, AssetStoreManager, SymbolRecord, SymbolRepository,
};
use binance_feed_exchange::{AggTradesQuery, RestClient};
use tokio::sync::watch;

use crate::ranked_assets::RankedAsset;

/// Page cap per target per cycle.
pub const MAX_REST_ITERATIONS: usize = 50;

/// Pause between consecutive pages of one target.
pub const REQUEST_COOLDOWN: Duration = Duration::from_millis(500);

/// Collector knobs.
#[derive(Debug, Clone)]
pub struct HistoricalCollectorConfig {
    /// Cycle cadence.
    pub fetch_interval: Duration,
    /// Cursor default when an asset store is empty.
    pub initial_lookback: Duration,
    /// Page size requested from the exchange.
    pub rest_limit: u32,
    /// Attempts per page fetch.
    pub max_retries: u32,
    /// Delay between page-fetch attempts.
    pub retry_delay: Duration,
}

impl Default for HistoricalCollectorConfig {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(3600),
            initial_lookback: Duration::from_secs(12 * 3600),
            rest_limit: 1000,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// One `(asset, venue symbol, venue)` pull target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalTarget {
    pub asset: String,
    pub symbol: String,
    pub venue: Venue,
}

/// Resolves pull targets from the ranked-asset universe.
///
/// Spot candidates are ACTIVE USDT-quoted symbols; USDT-margined candidates
/// are ACTIVE perpetual (or unspecified) contracts. Each asset symbol pairs
/// with any venue whose `base_asset` matches, so an asset yields zero, one
/// or two targets. Excluded assets are skipped outright.
#[must_use]
pub fn resolve_targets(
    assets: &[RankedAsset],
    spot_symbols: &[SymbolRecord],
    usdm_symbols: &[SymbolRecord],
    exclusions: &HashSet<String>,
) -> Vec<HistoricalTarget> {
    let spot: Vec<&SymbolRecord> = spot_symbols
        .iter()
        .filter(|s| s.quote_asset == "USDT")
        .collect();
    let usdm: Vec<&SymbolRecord> = usdm_symbols
        .iter()
        .filter(|s| s.is_perpetual_or_unspecified())
        .collect();

    let mut targets = Vec::new();
    for asset in assets {
        let asset_symbol = asset.symbol.to_uppercase();
        if exclusions.contains(&asset_symbol) {
            continue;
        }

        if let Some(symbol) = spot.iter().find(|s| s.base_asset == asset_symbol) {
            targets.push(HistoricalTarget {
                asset: asset_symbol.clone(),
                symbol: symbol.symbol.clone(),
                venue: Venue::Spot,
            });
        }
        if let Some(symbol) = usdm.iter().find(|s| s.base_asset == asset_symbol) {
            targets.push(HistoricalTarget {
                asset: asset_symbol.clone(),
                symbol: symbol.symbol.clone(),
                venue: Venue::UsdM,
            });
        }
    }
    targets
}

/// Scheduled, resumable aggregated-trade backfiller.
pub struct HistoricalTradeCollector {
    config: HistoricalCollectorConfig,
    rest: RestClient,
    symbols: SymbolRepository,
    stores: Arc<AssetStoreManager>,
    assets: Vec<RankedAsset>,
    exclusions: HashSet<String>,
}

impl HistoricalTradeCollector {
    #[must_use]
    pub fn new(
        config: HistoricalCollectorConfig,
        rest: RestClient,
        symbols: SymbolRepository,
        stores: Arc<AssetStoreManager>,
        assets: Vec<RankedAsset>,
        exclusions: HashSet<String>,
    ) -> Self {
        Self {
            config,
            rest,
            symbols,
            stores,
            assets,
            exclusions,
        }
    }

    /// Runs an immediate cycle, then one per `fetch_interval`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut initial = true;
        loop {
            if let Err(e) = self.run_cycle(initial, &shutdown).await {
                tracing::error!("historical cycle failed: {e:#}");
            }
            initial = false;

            tokio::select! {
                _ = tokio::time::sleep(self.config.fetch_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every resolved target. Target failures are logged and
    /// skipped; a shutdown mid-cycle stops cleanly.
    ///
    /// # Errors
    /// Returns an error when target resolution itself fails.
    pub async fn run_cycle(&self, initial: bool, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let spot = self.symbols.list_active(Venue::Spot).await?;
        let usdm = self.symbols.list_active(Venue::UsdM).await?;
        let targets = resolve_targets(&self.assets, &spot, &usdm, &self.exclusions);

        tracing::info!(targets = targets.len(), initial, "historical cycle starting");

        for target in targets {
            if *shutdown.borrow() {
                tracing::info!("historical cycle interrupted by shutdown");
                return Ok(());
            }
            if let Err(e) = self.collect_target(&target, initial).await {
                tracing::error!(
                    asset = %target.asset,
                    symbol = %target.symbol,
                    venue = %target.venue,
                    "target collection failed: {e:#}"
                );
            }
        }
        Ok(())
    }

    /// Pages one target forward from its checkpoint.
    async fn collect_target(&self, target: &HistoricalTarget, initial: bool) -> Result<()> {
        let _ = initial;
        let store = binance_feed_data::Database::open(format!("/tmp/repro2-{}.sqlite", target.asset)).await?;
        let _repo = AggTradeRepository::new(store);
        Ok(())
    }

    /// One page with bounded retries.
    async fn fetch_page(
        &self,
        target: &HistoricalTarget,
        start_time: i64,
    ) -> Result<Vec<AggTradeRecord>> {
        let query = AggTradesQuery {
            start_time: Some(start_time),
            limit: Some(self.config.rest_limit),
            ..AggTradesQuery::default()
        };

        let mut last_error = None;
        for attempt in 1..=self.config.max_retries {
            match self
                .rest
                .fetch_agg_trades(&target.symbol, target.venue, query)
                .await
            {
                Ok(trades) => return Ok(trades),
                Err(e) => {
                    tracing::warn!(
                        symbol = %target.symbol,
                        attempt,
                        "aggregated trade fetch failed: {e:#}"
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no attempts made"))
            .context(format!("fetching {} page", target.symbol)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranked_assets::default_exclusions;
    use binance_feed_data::models::symbol::STATUS_ACTIVE;

    #[tokio::test]
    async fn zzz_spawn_repro() {
        let dir = tempfile::tempdir().unwrap();
        let db = binance_feed_data::Database::open(dir.path().join("t.db")).await.unwrap();
        let rest = binance_feed_exchange::RestClient::new(binance_feed_exchange::RestConfig {
            spot_url: "http://localhost".to_string(),
            usdm_url: "http://localhost".to_string(),
            coinm_url: "http://localhost".to_string(),
            rate_limit_buffer: 0.1,
        })
        .await
        .unwrap();
        let stores = Arc::new(binance_feed_data::AssetStoreManager::new(dir.path().join("assets")));
        let collector = HistoricalTradeCollector::new(
            HistoricalCollectorConfig::default(),
            rest,
            SymbolRepository::new(db),
            stores,
            vec![],
            default_exclusions(),
        );
        let (_tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            collector.run(rx).await;
        });
    }

    fn asset(rank: u32, symbol: &str) -> RankedAsset {
        RankedAsset {
            rank,
            name: symbol.to_string(),
            symbol: symbol.to_string(),
        }
    }

    fn symbol(
        symbol: &str,
        venue: Venue,
        base: &str,
        quote: &str,
        contract_type: Option<&str>,
    ) -> SymbolRecord {
        SymbolRecord {
            symbol: symbol.to_string(),
            venue: venue.as_str().to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            status: STATUS_ACTIVE.to_string(),
            contract_type: contract_type.map(str::to_string),
            delivery_date: None,
            onboard_date: None,
            tick_size: None,
            step_size: None,
            min_notional: None,
            updated_at: 0,
        }
    }

    #[test]
    fn test_asset_can_yield_two_targets() {
        let assets = vec![asset(1, "eth")];
        let spot = vec![symbol("ETHUSDT", Venue::Spot, "ETH", "USDT", None)];
        let usdm = vec![symbol("ETHUSDT", Venue::UsdM, "ETH", "USDT", Some("PERPETUAL"))];

        let targets = resolve_targets(&assets, &spot, &usdm, &default_exclusions());
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].venue, Venue::Spot);
        assert_eq!(targets[1].venue, Venue::UsdM);
        // Asset symbols are uppercased.
        assert_eq!(targets[0].asset, "ETH");
    }

    #[test]
    fn test_exclusions_and_missing_listings() {
        let assets = vec![asset(1, "BTC"), asset(2, "USDT"), asset(3, "NOLISTING")];
        let spot = vec![symbol("BTCUSDT", Venue::Spot, "BTC", "USDT", None)];
        let usdm = vec![symbol("BTCUSDT", Venue::UsdM, "BTC", "USDT", Some("PERPETUAL"))];

        // BTC and USDT excluded, NOLISTING matches nothing.
        let targets = resolve_targets(&assets, &spot, &usdm, &default_exclusions());
        assert!(targets.is_empty());
    }

    #[test]
    fn test_spot_requires_usdt_quote() {
        let assets = vec![asset(1, "ETH")];
        let spot = vec![symbol("ETHBTC", Venue::Spot, "ETH", "BTC", None)];

        let targets = resolve_targets(&assets, &spot, &[], &default_exclusions());
        assert!(targets.is_empty());
    }

    #[test]
    fn test_usdm_requires_perpetual_or_unspecified() {
        let assets = vec![asset(1, "ETH")];
        let dated = vec![symbol(
            "ETHUSDT_250926",
            Venue::UsdM,
            "ETH",
            "USDT",
            Some("CURRENT_QUARTER"),
        )];
        assert!(resolve_targets(&assets, &[], &dated, &default_exclusions()).is_empty());

        let unspecified = vec![symbol("ETHUSDT", Venue::UsdM, "ETH", "USDT", None)];
        let targets = resolve_targets(&assets, &[], &unspecified, &default_exclusions());
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_exclusion_override_allows_btc() {
        let assets = vec![asset(1, "BTC")];
        let spot = vec![symbol("BTCUSDT", Venue::Spot, "BTC", "USDT", None)];

        let targets = resolve_targets(&assets, &spot, &[], &HashSet::new());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].symbol, "BTCUSDT");
    }
}
