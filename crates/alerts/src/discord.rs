//! Discord webhook alert sink.
//!
//! Formats a CVD alert payload into a webhook message, POSTs it with
//! bounded internal retries, and records the dispatch in the permanent
//! alert history before returning. A final failure is re-raised so the
//! queue records it against the entry.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use binance_feed_data::{AlertRepository, CvdAlertPayload, TriggerSource};
use chrono::{TimeZone, Utc};

/// External alert destination.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Delivers one alert; on success the alert must already be recorded in
    /// the history before this returns.
    async fn send_cvd_alert(&self, payload: &CvdAlertPayload) -> Result<()>;
}

/// Webhook sink configuration.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub webhook_url: String,
    /// Internal delivery attempts per alert.
    pub max_retries: u32,
    /// Delay between delivery attempts.
    pub retry_delay: Duration,
}

impl DiscordConfig {
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Discord webhook implementation of [`AlertSink`].
pub struct DiscordAlertService {
    http: reqwest::Client,
    config: DiscordConfig,
    history: AlertRepository,
}

impl DiscordAlertService {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: DiscordConfig, history: AlertRepository) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building webhook HTTP client")?;
        Ok(Self {
            http,
            config,
            history,
        })
    }

    async fn post_once(&self, content: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.config.webhook_url)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .context("posting webhook")?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(anyhow!("webhook returned {status}: {body}"))
        }
    }
}

#[async_trait]
impl AlertSink for DiscordAlertService {
    async fn send_cvd_alert(&self, payload: &CvdAlertPayload) -> Result<()> {
        let content = format_alert(payload);

        let mut last_error = None;
        for attempt in 1..=self.config.max_retries {
            match self.post_once(&content).await {
                Ok(()) => {
                    self.history
                        .insert_history(payload)
                        .await
                        .context("recording alert history")?;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        symbol = %payload.symbol,
                        attempt,
                        "webhook delivery failed: {e:#}"
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no delivery attempts made")))
    }
}

/// Renders the webhook message body.
#[must_use]
pub fn format_alert(payload: &CvdAlertPayload) -> String {
    let name = payload.display_name.as_deref().unwrap_or(&payload.symbol);
    let direction = if payload.trigger_z_score >= 0.0 {
        "buy pressure"
    } else {
        "sell pressure"
    };
    let source = match payload.trigger_source {
        TriggerSource::Cumulative => "cumulative CVD",
        TriggerSource::Delta => "volume delta",
    };
    let when = Utc
        .timestamp_millis_opt(payload.timestamp)
        .single()
        .map_or_else(|| payload.timestamp.to_string(), |t| t.to_rfc3339());

    format!(
        "**CVD alert: {name}** ({direction})\n\
         trigger: {source}, z-score {:.2} (log {:.2}, threshold {:.2} / raw {:.2})\n\
         cumulative {:.4}, delta {:.4} (z {:.2} / {:.2})\n\
         at {when}",
        payload.trigger_z_score,
        payload.log_trigger_z_score,
        payload.threshold,
        payload.raw_threshold,
        payload.cumulative_value,
        payload.delta,
        payload.z_score,
        payload.delta_z_score,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use binance_feed_data::ALERT_TYPE_CVD;

    fn payload(trigger_z: f64) -> CvdAlertPayload {
        CvdAlertPayload {
            alert_type: ALERT_TYPE_CVD.to_string(),
            symbol: "BTC".to_string(),
            display_name: Some("Bitcoin".to_string()),
            timestamp: 1_700_000_000_000,
            trigger_source: TriggerSource::Cumulative,
            trigger_z_score: trigger_z,
            z_score: trigger_z,
            delta: 12.5,
            delta_z_score: 1.0,
            threshold: 2.0,
            raw_threshold: 2.0_f64.exp(),
            log_trigger_z_score: trigger_z.abs().ln().copysign(trigger_z),
            raw_trigger_z_score: trigger_z,
            cumulative_value: 1_234.5,
        }
    }

    #[test]
    fn test_format_mentions_name_direction_and_thresholds() {
        let message = format_alert(&payload(10.0));

        assert!(message.contains("Bitcoin"));
        assert!(message.contains("buy pressure"));
        assert!(message.contains("cumulative CVD"));
        assert!(message.contains("z-score 10.00"));
        assert!(message.contains("threshold 2.00"));
        assert!(message.contains("raw 7.39"));
        assert!(message.contains("2023-11-14T22:13:20+00:00"));
    }

    #[test]
    fn test_format_negative_trigger_reads_as_sell_pressure() {
        let message = format_alert(&payload(-8.0));
        assert!(message.contains("sell pressure"));
    }

    #[test]
    fn test_format_falls_back_to_symbol_without_display_name() {
        let mut p = payload(5.0);
        p.display_name = None;
        assert!(format_alert(&p).contains("CVD alert: BTC"));
    }
}
