//! Per-role component wiring.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use binance_feed_alerts::{
    AlertDispatcher, AlertDispatcherConfig, DiscordAlertService, DiscordConfig,
};
use binance_feed_collectors::{
    default_exclusions, load_ranked_assets, CandleCollector, CandleCollectorConfig,
    HistoricalCollectorConfig, HistoricalTradeCollector, LiquidationCollector, RatioCollector,
    RatioCollectorConfig, StreamCollectorConfig, SymbolRegistry, TradeCollector,
};
use binance_feed_core::{AppConfig, Venue};
use binance_feed_cvd::{CvdWorker, CvdWorkerConfig};
use binance_feed_data::{
    AlertRepository, AssetStoreManager, BackupConfig, BackupScheduler, CandleRepository,
    Database, LiquidationRepository, RatioRepository, SymbolRepository, TradeRepository,
};
use binance_feed_exchange::{
    Channel, PushClient, PushClientConfig, PushEvent, RestClient, RestConfig, Subscription,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

fn rest_config(config: &AppConfig) -> RestConfig {
    RestConfig {
        spot_url: config.binance_rest_url.clone(),
        usdm_url: config.binance_usdm_rest_url.clone(),
        coinm_url: config.binance_coinm_rest_url.clone(),
        rate_limit_buffer: config.rate_limit_buffer,
    }
}

/// Ingest role: symbol registry, push collectors, historical and scheduled
/// REST collectors, backup.
pub async fn run_ingest(
    config: Arc<AppConfig>,
    db: Database,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let rest = RestClient::new(rest_config(&config)).await?;
    let groups = config.cvd_groups()?;

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // Symbol registry: immediate refresh, then the daily schedule. The
    // scheduled collectors re-read the catalog each cycle, so the update
    // notification stays unused here.
    let (registry, _updated_rx) = SymbolRegistry::new(
        rest.clone(),
        SymbolRepository::new(db.clone()),
        config.symbol_update_hour_utc,
    );
    {
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            registry.run(shutdown).await;
        }));
    }

    // Push subscriptions come from the aggregator groups: their trade
    // streams, plus liquidation channels on the futures venues they touch.
    let mut subscriptions = Vec::new();
    for group in &groups {
        for stream in &group.streams {
            subscriptions.push(Subscription {
                symbol: stream.symbol.clone(),
                venue: stream.market_type,
                channel: Channel::for_stream_type(stream.effective_stream_type()),
            });
            if stream.market_type != Venue::Spot {
                subscriptions.push(Subscription {
                    symbol: stream.symbol.clone(),
                    venue: stream.market_type,
                    channel: Channel::ForceOrder,
                });
            }
        }
    }

    let (events_tx, mut events_rx) = mpsc::channel::<PushEvent>(4096);
    let push = PushClient::new(
        PushClientConfig::new(
            config.binance_spot_ws_url.clone(),
            config.binance_usdm_ws_url.clone(),
            config.binance_coinm_ws_url.clone(),
        ),
        subscriptions,
        events_tx,
    );
    handles.extend(push.spawn(shutdown.clone()));

    // Route decoded push events to the two buffered collectors.
    let (trade_tx, trade_rx) = mpsc::channel(4096);
    let (liq_tx, liq_rx) = mpsc::channel(1024);
    handles.push(tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let sent = match event {
                PushEvent::Trade(trade) => trade_tx.send(trade).await.is_ok(),
                PushEvent::Liquidation(liq) => liq_tx.send(liq).await.is_ok(),
            };
            if !sent {
                break;
            }
        }
    }));

    {
        let mut collector = TradeCollector::new(
            StreamCollectorConfig::trades(),
            TradeRepository::new(db.clone()),
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            collector.run(trade_rx, shutdown).await;
        }));
    }
    {
        let mut collector = LiquidationCollector::new(
            StreamCollectorConfig::liquidations(),
            LiquidationRepository::new(db.clone()),
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            collector.run(liq_rx, shutdown).await;
        }));
    }

    // Historical backfill needs the ranked-asset universe; without the file
    // the rest of the role still runs.
    match load_ranked_assets_if_present(&config.ranked_assets_path)? {
        Some(assets) => {
            let stores = Arc::new(AssetStoreManager::new(config.asset_store_dir.clone()));
            let collector = HistoricalTradeCollector::new(
                HistoricalCollectorConfig::default(),
                rest.clone(),
                SymbolRepository::new(db.clone()),
                stores,
                assets,
                default_exclusions(),
            );
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                collector.run(shutdown).await;
            }));
        }
        None => {
            tracing::warn!(
                path = %config.ranked_assets_path,
                "ranked asset list missing, historical collector disabled"
            );
        }
    }

    {
        let collector = RatioCollector::new(
            RatioCollectorConfig::default(),
            rest.clone(),
            SymbolRepository::new(db.clone()),
            RatioRepository::new(db.clone()),
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            collector.run(shutdown).await;
        }));
    }

    {
        let collector = CandleCollector::new(
            CandleCollectorConfig {
                max_symbols: config.ws_max_symbols_per_stream,
                ..CandleCollectorConfig::default()
            },
            rest,
            SymbolRepository::new(db.clone()),
            CandleRepository::new(db.clone()),
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            collector.run(shutdown).await;
        }));
    }

    if config.database_backup_enabled {
        let scheduler = BackupScheduler::new(
            db,
            BackupConfig {
                target_dir: config.database_backup_path.clone().into(),
                interval: config.backup_interval(),
                single_file: config.database_backup_single_file,
                daily_days: config.database_backup_daily_days,
                weekly_weeks: config.database_backup_weekly_weeks,
            },
        );
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run(shutdown).await;
        }));
    }

    join_all(handles).await;
    Ok(())
}

/// Aggregate role: the CVD worker alone.
pub async fn run_aggregate(
    config: &AppConfig,
    db: Database,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let groups = config.cvd_groups()?;
    let worker_config = CvdWorkerConfig {
        batch_size: config.cvd_aggregation_batch_size,
        poll_interval: config.cvd_poll_interval(),
        suppression_window: config.suppression_window(),
        history_window: Duration::from_secs(72 * 3600),
        threshold_log: config.cvd_zscore_threshold,
        alerts_enabled: config.discord_webhook_url.is_some(),
    };

    let mut worker = CvdWorker::new(worker_config, db, groups)
        .await
        .context("initializing CVD worker")?;
    worker.run(shutdown).await;
    Ok(())
}

/// Alert role: the queue dispatcher over the Discord sink.
pub async fn run_alert(
    config: &AppConfig,
    db: Database,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let Some(webhook_url) = config.discord_webhook_url.clone() else {
        bail!("DISCORD_WEBHOOK_URL is required for the alert role");
    };

    let sink = DiscordAlertService::new(
        DiscordConfig::new(webhook_url),
        AlertRepository::new(db.clone()),
    )?;

    let dispatcher = AlertDispatcher::new(
        AlertDispatcherConfig {
            poll_interval: config.alert_poll_interval(),
            batch_size: config.alert_queue_batch_size,
            max_attempts: config.alert_queue_max_attempts,
        },
        AlertRepository::new(db),
        sink,
    );
    dispatcher.run(shutdown).await;
    Ok(())
}

fn load_ranked_assets_if_present(
    path: &str,
) -> Result<Option<Vec<binance_feed_collectors::RankedAsset>>> {
    if !Path::new(path).exists() {
        return Ok(None);
    }
    Ok(Some(load_ranked_assets(path)?))
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                tracing::error!("task ended abnormally: {e}");
            }
        }
    }
}
