//! Venue-aware REST client.
//!
//! A thin wrapper over the rate limiter: every venue gets one weighted
//! endpoint bucket, every call declares its documented weight, and 429/418
//! responses are classified as rate-limited so the limiter's backoff owns
//! them. String numerics are converted to `f64` on decode and results are
//! returned in event-time order.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use binance_feed_core::{CandleInterval, TradeSource, Venue};
use binance_feed_data::{AggTradeRecord, CandleRecord, RatioRecord};
use reqwest::StatusCode;
use thiserror::Error;

use crate::events::{json_f64, json_i64};
use crate::rate_limiter::{CallError, RateLimiter, RequestOptions};
use crate::symbols::ExchangeInfo;

/// Declared per-minute request-weight capacities, before the configured
/// buffer is applied.
const SPOT_WEIGHT_PER_MINUTE: u64 = 6000;
const USDM_WEIGHT_PER_MINUTE: u64 = 2400;
const COINM_WEIGHT_PER_MINUTE: u64 = 2400;

/// Server usage header consulted for cooperative throttling.
const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

/// Per-call request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard cap on aggregated-trade page size.
pub const MAX_AGG_TRADE_LIMIT: u32 = 1000;

/// Domain errors raised before any request is issued.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("venue {venue} does not support {operation}")]
    UnsupportedVenue {
        venue: Venue,
        operation: &'static str,
    },
}

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub spot_url: String,
    pub usdm_url: String,
    pub coinm_url: String,
    /// Fraction shaved off declared capacities (`1 - x` multiplier).
    pub rate_limit_buffer: f64,
}

/// Aggregated-trade page query.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggTradesQuery {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub from_id: Option<i64>,
    /// Page size, clamped to [`MAX_AGG_TRADE_LIMIT`].
    pub limit: Option<u32>,
}

/// Venue-aware REST client sharing one rate limiter.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    limiter: RateLimiter,
    config: RestConfig,
}

impl RestClient {
    /// Builds the client and registers one weight bucket per venue.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub async fn new(config: RestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;

        let limiter = RateLimiter::new();
        let buffer = 1.0 - config.rate_limit_buffer;
        for (key, declared) in [
            ("spot", SPOT_WEIGHT_PER_MINUTE),
            ("usdm", USDM_WEIGHT_PER_MINUTE),
            ("coinm", COINM_WEIGHT_PER_MINUTE),
        ] {
            let capacity = ((declared as f64) * buffer).floor() as u64;
            limiter
                .register_endpoint(key, capacity.max(1), Duration::from_secs(60))
                .await;
        }

        Ok(Self {
            http,
            limiter,
            config,
        })
    }

    /// The shared limiter (exposed so schedulers can co-register endpoints).
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn base_url(&self, venue: Venue) -> &str {
        match venue {
            Venue::Spot => &self.config.spot_url,
            Venue::UsdM => &self.config.usdm_url,
            Venue::CoinM => &self.config.coinm_url,
        }
    }

    const fn endpoint_key(venue: Venue) -> &'static str {
        match venue {
            Venue::Spot => "spot",
            Venue::UsdM => "usdm",
            Venue::CoinM => "coinm",
        }
    }

    /// Rate-limited GET returning the raw JSON body.
    async fn get_json(
        &self,
        venue: Venue,
        path: &str,
        params: Vec<(String, String)>,
        opts: RequestOptions,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url(venue), path);
        let key = Self::endpoint_key(venue);

        self.limiter
            .execute(key, opts, || {
                let http = self.http.clone();
                let limiter = self.limiter.clone();
                let url = url.clone();
                let params = params.clone();
                async move {
                    let response = http
                        .get(&url)
                        .query(&params)
                        .send()
                        .await
                        .map_err(|e| CallError::Other(anyhow!("GET {url}: {e}")))?;

                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::IM_A_TEAPOT
                    {
                        return Err(CallError::RateLimited(anyhow!(
                            "GET {url}: status {status}"
                        )));
                    }

                    if let Some(used) = response
                        .headers()
                        .get(USED_WEIGHT_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                    {
                        limiter.note_usage(key, used).await;
                    }

                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(CallError::Other(anyhow!(
                            "GET {url}: status {status}: {body}"
                        )));
                    }

                    response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| CallError::Other(anyhow!("GET {url}: decode: {e}")))
                }
            })
            .await
    }

    /// Fetches candles for one symbol, ascending by open time. Weight 2.
    ///
    /// # Errors
    /// Returns an error after the limiter's retry budget, or on a malformed
    /// response.
    pub async fn fetch_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        venue: Venue,
        start_time: Option<i64>,
    ) -> Result<Vec<CandleRecord>> {
        let path = match venue {
            Venue::Spot => "/api/v3/klines",
            Venue::UsdM => "/fapi/v1/klines",
            Venue::CoinM => "/dapi/v1/klines",
        };

        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), interval.as_str().to_string()),
            ("limit".to_string(), "1000".to_string()),
        ];
        if let Some(start) = start_time {
            params.push(("startTime".to_string(), start.to_string()));
        }

        let opts = RequestOptions::new(format!("klines:{symbol}:{}", interval.as_str()))
            .with_weight(2);
        let body = self.get_json(venue, path, params, opts).await?;
        decode_klines(symbol, &body)
    }

    /// Fetches an aggregated-trade page, ascending by trade time. Weight 2
    /// on spot, 20 on USDT-margined; coin-margined is unsupported.
    ///
    /// # Errors
    /// Returns `ExchangeError::UnsupportedVenue` for COIN-M, otherwise the
    /// transport/decoding error.
    pub async fn fetch_agg_trades(
        &self,
        symbol: &str,
        venue: Venue,
        query: AggTradesQuery,
    ) -> Result<Vec<AggTradeRecord>> {
        let (path, weight) = match venue {
            Venue::Spot => ("/api/v3/aggTrades", 2),
            Venue::UsdM => ("/fapi/v1/aggTrades", 20),
            Venue::CoinM => {
                return Err(ExchangeError::UnsupportedVenue {
                    venue,
                    operation: "aggregated trades",
                }
                .into())
            }
        };

        let limit = query.limit.unwrap_or(MAX_AGG_TRADE_LIMIT).min(MAX_AGG_TRADE_LIMIT);
        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(start) = query.start_time {
            params.push(("startTime".to_string(), start.to_string()));
        }
        if let Some(end) = query.end_time {
            params.push(("endTime".to_string(), end.to_string()));
        }
        if let Some(from_id) = query.from_id {
            params.push(("fromId".to_string(), from_id.to_string()));
        }

        let opts = RequestOptions::new(format!("aggTrades:{symbol}:{venue}")).with_weight(weight);
        let body = self.get_json(venue, path, params, opts).await?;
        decode_agg_trades(symbol, venue, &body)
    }

    /// Top-trader long/short ratio by position size (USDT-margined only).
    /// Period 5m, limit 12, weight 20.
    ///
    /// # Errors
    /// Returns the transport or decoding error.
    pub async fn fetch_top_trader_positions(&self, symbol: &str) -> Result<Vec<RatioRecord>> {
        self.fetch_ratio("/futures/data/topLongShortPositionRatio", symbol)
            .await
    }

    /// Top-trader long/short ratio by account count (USDT-margined only).
    ///
    /// # Errors
    /// Returns the transport or decoding error.
    pub async fn fetch_top_trader_accounts(&self, symbol: &str) -> Result<Vec<RatioRecord>> {
        self.fetch_ratio("/futures/data/topLongShortAccountRatio", symbol)
            .await
    }

    async fn fetch_ratio(&self, path: &str, symbol: &str) -> Result<Vec<RatioRecord>> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("period".to_string(), "5m".to_string()),
            ("limit".to_string(), "12".to_string()),
        ];
        let opts = RequestOptions::new(format!("topTrader:{symbol}")).with_weight(20);
        let body = self.get_json(Venue::UsdM, path, params, opts).await?;
        decode_ratio_samples(&body)
    }

    /// Fetches the venue symbol catalog. Weight 10.
    ///
    /// # Errors
    /// Returns the transport or decoding error.
    pub async fn fetch_exchange_info(&self, venue: Venue) -> Result<ExchangeInfo> {
        let path = match venue {
            Venue::Spot => "/api/v3/exchangeInfo",
            Venue::UsdM => "/fapi/v1/exchangeInfo",
            Venue::CoinM => "/dapi/v1/exchangeInfo",
        };
        let opts = RequestOptions::new(format!("exchangeInfo:{venue}")).with_weight(10);
        let body = self.get_json(venue, path, Vec::new(), opts).await?;
        Ok(serde_json::from_value(body).context("decoding exchangeInfo")?)
    }
}

/// Decodes a klines array-of-arrays response.
fn decode_klines(symbol: &str, body: &serde_json::Value) -> Result<Vec<CandleRecord>> {
    let rows = body
        .as_array()
        .ok_or_else(|| anyhow!("klines response is not an array"))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = row
            .as_array()
            .ok_or_else(|| anyhow!("kline row is not an array"))?;
        let field = |i: usize| fields.get(i).ok_or_else(|| anyhow!("kline row too short"));

        candles.push(CandleRecord {
            symbol: symbol.to_string(),
            open_time: json_i64(field(0)?).ok_or_else(|| anyhow!("bad openTime"))?,
            open: json_f64(field(1)?).ok_or_else(|| anyhow!("bad open"))?,
            high: json_f64(field(2)?).ok_or_else(|| anyhow!("bad high"))?,
            low: json_f64(field(3)?).ok_or_else(|| anyhow!("bad low"))?,
            close: json_f64(field(4)?).ok_or_else(|| anyhow!("bad close"))?,
            volume: json_f64(field(5)?).ok_or_else(|| anyhow!("bad volume"))?,
            close_time: json_i64(field(6)?).ok_or_else(|| anyhow!("bad closeTime"))?,
            quote_volume: json_f64(field(7)?).ok_or_else(|| anyhow!("bad quoteVolume"))?,
            trade_count: json_i64(field(8)?).ok_or_else(|| anyhow!("bad tradeCount"))?,
        });
    }

    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

/// Decodes an aggTrades object-array response.
fn decode_agg_trades(
    symbol: &str,
    venue: Venue,
    body: &serde_json::Value,
) -> Result<Vec<AggTradeRecord>> {
    let rows = body
        .as_array()
        .ok_or_else(|| anyhow!("aggTrades response is not an array"))?;

    let mut trades = Vec::with_capacity(rows.len());
    for row in rows {
        let get = |k: &str| row.get(k).ok_or_else(|| anyhow!("aggTrade missing '{k}'"));

        trades.push(AggTradeRecord {
            symbol: symbol.to_string(),
            venue,
            trade_id: json_i64(get("a")?).ok_or_else(|| anyhow!("bad trade id"))?,
            price: json_f64(get("p")?).ok_or_else(|| anyhow!("bad price"))?,
            quantity: json_f64(get("q")?).ok_or_else(|| anyhow!("bad quantity"))?,
            first_trade_id: json_i64(get("f")?).ok_or_else(|| anyhow!("bad first id"))?,
            last_trade_id: json_i64(get("l")?).ok_or_else(|| anyhow!("bad last id"))?,
            trade_time: json_i64(get("T")?).ok_or_else(|| anyhow!("bad trade time"))?,
            is_buyer_maker: row
                .get("m")
                .and_then(serde_json::Value::as_bool)
                .ok_or_else(|| anyhow!("bad maker flag"))?,
            is_best_match: row.get("M").and_then(serde_json::Value::as_bool),
            source: TradeSource::Rest,
        });
    }

    trades.sort_by_key(|t| (t.trade_time, t.trade_id));
    Ok(trades)
}

/// Decodes a top-trader ratio response.
fn decode_ratio_samples(body: &serde_json::Value) -> Result<Vec<RatioRecord>> {
    let rows = body
        .as_array()
        .ok_or_else(|| anyhow!("ratio response is not an array"))?;

    let mut samples = Vec::with_capacity(rows.len());
    for row in rows {
        let get = |k: &str| row.get(k).ok_or_else(|| anyhow!("ratio row missing '{k}'"));

        samples.push(RatioRecord {
            symbol: row
                .get("symbol")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            timestamp: json_i64(get("timestamp")?).ok_or_else(|| anyhow!("bad timestamp"))?,
            long_short_ratio: json_f64(get("longShortRatio")?)
                .ok_or_else(|| anyhow!("bad longShortRatio"))?,
            long_account: json_f64(get("longAccount")?)
                .ok_or_else(|| anyhow!("bad longAccount"))?,
            short_account: json_f64(get("shortAccount")?)
                .ok_or_else(|| anyhow!("bad shortAccount"))?,
        });
    }

    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}
