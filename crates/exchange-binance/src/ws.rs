//! Market-segregated push-channel client.
//!
//! Desired subscriptions are grouped by venue; each venue gets one combined
//! stream connection (`<base>/stream?streams=a@aggTrade/b@forceOrder`). The
//! connection task pings on a heartbeat interval, decodes incoming messages
//! into typed events, and reconnects with truncated exponential backoff on
//! any abnormal close. An explicit shutdown stops everything without
//! reconnecting.

use std::collections::BTreeMap;
use std::time::Duration;

use binance_feed_core::{StreamType, Venue};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use crate::events::{decode_message, PushEvent};

/// Push channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    AggTrade,
    Trade,
    ForceOrder,
}

impl Channel {
    /// Stream suffix after the `@`.
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::AggTrade => "aggTrade",
            Self::Trade => "trade",
            Self::ForceOrder => "forceOrder",
        }
    }

    /// Channel carrying a given trade stream type.
    #[must_use]
    pub const fn for_stream_type(stream_type: StreamType) -> Self {
        match stream_type {
            StreamType::AggTrade => Self::AggTrade,
            StreamType::Trade => Self::Trade,
        }
    }
}

/// One desired `(symbol, venue, channel)` subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub symbol: String,
    pub venue: Venue,
    pub channel: Channel,
}

impl Subscription {
    /// Wire channel name, e.g. `btcusdt@aggTrade`.
    #[must_use]
    pub fn channel_name(&self) -> String {
        format!("{}@{}", self.symbol.to_lowercase(), self.channel.suffix())
    }
}

/// Push client configuration.
#[derive(Debug, Clone)]
pub struct PushClientConfig {
    pub spot_ws_url: String,
    pub usdm_ws_url: String,
    pub coinm_ws_url: String,
    /// Ping cadence while connected.
    pub heartbeat_interval: Duration,
    /// First reconnect delay; doubles per consecutive failure.
    pub reconnect_base: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_cap: Duration,
}

impl PushClientConfig {
    #[must_use]
    pub fn new(spot: impl Into<String>, usdm: impl Into<String>, coinm: impl Into<String>) -> Self {
        Self {
            spot_ws_url: spot.into(),
            usdm_ws_url: usdm.into(),
            coinm_ws_url: coinm.into(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(5),
            reconnect_cap: Duration::from_secs(60),
        }
    }

    fn base_url(&self, venue: Venue) -> &str {
        match venue {
            Venue::Spot => &self.spot_ws_url,
            Venue::UsdM => &self.usdm_ws_url,
            Venue::CoinM => &self.coinm_ws_url,
        }
    }
}

/// Builds one combined-stream URL per venue with any subscriptions.
#[must_use]
pub fn group_by_venue(subscriptions: &[Subscription]) -> BTreeMap<Venue, Vec<String>> {
    let mut groups: BTreeMap<Venue, Vec<String>> = BTreeMap::new();
    for sub in subscriptions {
        let channels = groups.entry(sub.venue).or_default();
        let name = sub.channel_name();
        if !channels.contains(&name) {
            channels.push(name);
        }
    }
    groups
}

/// Combined-stream URL for one venue connection.
#[must_use]
pub fn stream_url(base: &str, channels: &[String]) -> String {
    format!("{}/stream?streams={}", base.trim_end_matches('/'), channels.join("/"))
}

/// Market-segregated persistent push connections emitting typed events.
pub struct PushClient {
    config: PushClientConfig,
    subscriptions: Vec<Subscription>,
    events_tx: mpsc::Sender<PushEvent>,
}

enum ReadEnd {
    /// Server closed with code 1000; no reconnect.
    Clean,
    /// Transport loss or abnormal close; reconnect.
    Lost,
    /// Shutdown signal observed.
    Shutdown,
}

impl PushClient {
    #[must_use]
    pub fn new(
        config: PushClientConfig,
        subscriptions: Vec<Subscription>,
        events_tx: mpsc::Sender<PushEvent>,
    ) -> Self {
        Self {
            config,
            subscriptions,
            events_tx,
        }
    }

    /// Spawns one connection task per venue that has subscriptions.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let groups = group_by_venue(&self.subscriptions);
        let mut handles = Vec::with_capacity(groups.len());

        for (venue, channels) in groups {
            let config = self.config.clone();
            let events_tx = self.events_tx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_venue_connection(config, venue, channels, events_tx, shutdown).await;
            }));
        }
        handles
    }
}

async fn run_venue_connection(
    config: PushClientConfig,
    venue: Venue,
    channels: Vec<String>,
    events_tx: mpsc::Sender<PushEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = stream_url(config.base_url(venue), &channels);
    let mut failures = 0u32;

    loop {
        if *shutdown.borrow() {
            return;
        }

        tracing::info!(%venue, streams = channels.len(), "connecting push channel");
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                failures = 0;
                tracing::info!(%venue, "push channel ready");
                match read_loop(ws, venue, &config, &events_tx, &mut shutdown).await {
                    ReadEnd::Clean => {
                        tracing::info!(%venue, "push channel closed normally");
                        return;
                    }
                    ReadEnd::Shutdown => return,
                    ReadEnd::Lost => {}
                }
            }
            Err(e) => {
                tracing::error!(%venue, "push connect failed: {e}");
            }
        }

        failures += 1;
        let delay = reconnect_delay(&config, failures);
        tracing::warn!(
            %venue,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            "reconnecting push channel"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn read_loop(
    mut ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    venue: Venue,
    config: &PushClientConfig,
    events_tx: &mpsc::Sender<PushEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadEnd {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // immediate first tick

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = ws.close(None).await;
                    return ReadEnd::Shutdown;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = ws.send(Message::Ping(Vec::new())).await {
                    tracing::warn!(%venue, "heartbeat ping failed: {e}");
                    return ReadEnd::Lost;
                }
            }
            message = ws.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match decode_message(venue, &text) {
                            Some(event) => {
                                if events_tx.send(event).await.is_err() {
                                    tracing::info!(%venue, "event channel closed");
                                    let _ = ws.close(None).await;
                                    return ReadEnd::Clean;
                                }
                            }
                            None => {
                                tracing::debug!(%venue, "dropped undecodable push message");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws.send(Message::Pong(payload)).await.is_err() {
                            return ReadEnd::Lost;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let normal = frame
                            .as_ref()
                            .is_some_and(|f| f.code == CloseCode::Normal);
                        return if normal { ReadEnd::Clean } else { ReadEnd::Lost };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(%venue, "push transport error: {e}");
                        return ReadEnd::Lost;
                    }
                    None => return ReadEnd::Lost,
                }
            }
        }
    }
}

/// Truncated exponential reconnect backoff with jitter.
fn reconnect_delay(config: &PushClientConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = config.reconnect_base.saturating_mul(1u32 << exp);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
    base.saturating_add(jitter).min(config.reconnect_cap)
}
