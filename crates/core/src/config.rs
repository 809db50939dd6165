//! Application configuration.
//!
//! Every knob is an environment variable with a serde default; `load` merges
//! the defaults with the process environment through figment. Validation
//! failures are fatal at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::groups::{self, AggregatorGroup};
use crate::types::ProcessRole;

/// Minimum poll interval accepted for the CVD worker and alert dispatcher.
pub const MIN_POLL_INTERVAL_MS: u64 = 500;

/// Configuration errors detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SYMBOL_UPDATE_HOUR_UTC must be 0-23, got {0}")]
    InvalidUpdateHour(u32),

    #[error("RATE_LIMIT_BUFFER must be within [0, 1), got {0}")]
    InvalidRateLimitBuffer(f64),

    #[error("CVD_ZSCORE_THRESHOLD must be positive, got {0}")]
    InvalidZScoreThreshold(f64),

    #[error("ALERT_QUEUE_MAX_ATTEMPTS must be at least 1")]
    InvalidMaxAttempts,

    #[error("DISCORD_WEBHOOK_URL is not a Discord webhook URL: {0}")]
    InvalidWebhookUrl(String),

    #[error("BINANCE_PROCESS_ROLE '{0}' is not one of ingest, aggregate, alert")]
    InvalidProcessRole(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // ---- store ----
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_asset_store_dir")]
    pub asset_store_dir: String,

    // ---- backup ----
    #[serde(default)]
    pub database_backup_enabled: bool,
    #[serde(default = "default_backup_path")]
    pub database_backup_path: String,
    #[serde(default = "default_backup_interval_hours")]
    pub database_backup_interval_hours: u64,
    #[serde(default)]
    pub database_backup_single_file: bool,
    #[serde(default = "default_backup_daily_days")]
    pub database_backup_daily_days: u32,
    #[serde(default = "default_backup_weekly_weeks")]
    pub database_backup_weekly_weeks: u32,

    // ---- exchange endpoints ----
    #[serde(default = "default_spot_rest_url")]
    pub binance_rest_url: String,
    #[serde(default = "default_usdm_rest_url")]
    pub binance_usdm_rest_url: String,
    #[serde(default = "default_coinm_rest_url")]
    pub binance_coinm_rest_url: String,
    #[serde(default = "default_spot_ws_url")]
    pub binance_spot_ws_url: String,
    #[serde(default = "default_usdm_ws_url")]
    pub binance_usdm_ws_url: String,
    #[serde(default = "default_coinm_ws_url")]
    pub binance_coinm_ws_url: String,

    // ---- admission control / streaming ----
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: f64,
    #[serde(default = "default_ws_max_symbols")]
    pub ws_max_symbols_per_stream: usize,

    // ---- symbol registry ----
    #[serde(default = "default_symbol_update_hour")]
    pub symbol_update_hour_utc: u32,

    // ---- CVD worker ----
    #[serde(default = "default_cvd_threshold")]
    pub cvd_zscore_threshold: f64,
    #[serde(default = "default_cvd_batch_size")]
    pub cvd_aggregation_batch_size: u32,
    #[serde(default = "default_cvd_poll_interval")]
    pub cvd_aggregation_poll_interval_ms: u64,
    #[serde(default = "default_suppression_minutes")]
    pub cvd_alert_suppression_minutes: u64,
    #[serde(default)]
    pub binance_cvd_groups: Option<String>,

    // ---- alert queue ----
    #[serde(default = "default_alert_poll_interval")]
    pub alert_queue_poll_interval_ms: u64,
    #[serde(default = "default_alert_batch_size")]
    pub alert_queue_batch_size: u32,
    #[serde(default = "default_alert_max_attempts")]
    pub alert_queue_max_attempts: u32,
    #[serde(default)]
    pub discord_webhook_url: Option<String>,

    // ---- process ----
    #[serde(default)]
    pub binance_process_role: Option<String>,
    #[serde(default = "default_ranked_assets_path")]
    pub ranked_assets_path: String,
}

fn default_database_path() -> String {
    expand_home("~/workspace/crypto-data/data/binance.db")
}

fn default_asset_store_dir() -> String {
    expand_home("~/workspace/crypto-data/data/assets")
}

fn default_backup_path() -> String {
    expand_home("~/workspace/crypto-data/backups")
}

// Home expansion without pulling in a crate for one call site.
fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{home}/{rest}"),
        _ => path.to_string(),
    }
}

const fn default_backup_interval_hours() -> u64 {
    24
}

const fn default_backup_daily_days() -> u32 {
    7
}

const fn default_backup_weekly_weeks() -> u32 {
    1
}

fn default_spot_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_usdm_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_coinm_rest_url() -> String {
    "https://dapi.binance.com".to_string()
}

fn default_spot_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_usdm_ws_url() -> String {
    "wss://fstream.binance.com".to_string()
}

fn default_coinm_ws_url() -> String {
    "wss://dstream.binance.com".to_string()
}

const fn default_rate_limit_buffer() -> f64 {
    0.1
}

const fn default_ws_max_symbols() -> usize {
    300
}

const fn default_symbol_update_hour() -> u32 {
    1
}

const fn default_cvd_threshold() -> f64 {
    2.0
}

const fn default_cvd_batch_size() -> u32 {
    500
}

const fn default_cvd_poll_interval() -> u64 {
    2000
}

const fn default_suppression_minutes() -> u64 {
    30
}

const fn default_alert_poll_interval() -> u64 {
    2000
}

const fn default_alert_batch_size() -> u32 {
    20
}

const fn default_alert_max_attempts() -> u32 {
    5
}

fn default_ranked_assets_path() -> String {
    "config/ranked_assets.csv".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        // Round-trip through serde so the field defaults stay the single
        // source of truth.
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

/// Environment keys consumed by `AppConfig::load`.
const ENV_KEYS: &[&str] = &[
    "database_path",
    "asset_store_dir",
    "database_backup_enabled",
    "database_backup_path",
    "database_backup_interval_hours",
    "database_backup_single_file",
    "database_backup_daily_days",
    "database_backup_weekly_weeks",
    "binance_rest_url",
    "binance_usdm_rest_url",
    "binance_coinm_rest_url",
    "binance_spot_ws_url",
    "binance_usdm_ws_url",
    "binance_coinm_ws_url",
    "rate_limit_buffer",
    "ws_max_symbols_per_stream",
    "symbol_update_hour_utc",
    "cvd_zscore_threshold",
    "cvd_aggregation_batch_size",
    "cvd_aggregation_poll_interval_ms",
    "cvd_alert_suppression_minutes",
    "binance_cvd_groups",
    "alert_queue_poll_interval_ms",
    "alert_queue_batch_size",
    "alert_queue_max_attempts",
    "discord_webhook_url",
    "binance_process_role",
    "ranked_assets_path",
];

impl AppConfig {
    /// Loads configuration from the process environment over the defaults.
    ///
    /// # Errors
    /// Returns an error when an environment value fails to parse or when
    /// validation rejects the resulting configuration.
    pub fn load() -> anyhow::Result<Self> {
        use figment::providers::{Env, Serialized};
        use figment::Figment;

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::raw().only(ENV_KEYS))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validates ranges and cross-field requirements.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol_update_hour_utc > 23 {
            return Err(ConfigError::InvalidUpdateHour(self.symbol_update_hour_utc));
        }
        if !(0.0..1.0).contains(&self.rate_limit_buffer) {
            return Err(ConfigError::InvalidRateLimitBuffer(self.rate_limit_buffer));
        }
        if self.cvd_zscore_threshold <= 0.0 {
            return Err(ConfigError::InvalidZScoreThreshold(
                self.cvd_zscore_threshold,
            ));
        }
        if self.alert_queue_max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        if let Some(role) = &self.binance_process_role {
            if ProcessRole::parse(role).is_none() {
                return Err(ConfigError::InvalidProcessRole(role.clone()));
            }
        }
        if let Some(url) = &self.discord_webhook_url {
            validate_webhook_url(url)?;
        }
        Ok(())
    }

    /// Parses the configured process role, if any.
    #[must_use]
    pub fn process_role(&self) -> Option<ProcessRole> {
        self.binance_process_role
            .as_deref()
            .and_then(ProcessRole::parse)
    }

    /// Parses the aggregator groups, falling back to the built-in defaults.
    ///
    /// # Errors
    /// Returns an error when `BINANCE_CVD_GROUPS` is set but malformed.
    pub fn cvd_groups(&self) -> anyhow::Result<Vec<AggregatorGroup>> {
        match &self.binance_cvd_groups {
            Some(json) => groups::parse_groups(json),
            None => Ok(groups::default_groups()),
        }
    }

    /// CVD worker idle delay, clamped to the minimum.
    #[must_use]
    pub fn cvd_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.cvd_aggregation_poll_interval_ms
                .max(MIN_POLL_INTERVAL_MS),
        )
    }

    /// Alert dispatcher idle delay, clamped to the minimum.
    #[must_use]
    pub fn alert_poll_interval(&self) -> Duration {
        Duration::from_millis(self.alert_queue_poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    /// Alert suppression window.
    #[must_use]
    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.cvd_alert_suppression_minutes * 60)
    }

    /// Backup cadence.
    #[must_use]
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.database_backup_interval_hours * 3600)
    }
}

/// Checks that a webhook URL points at a Discord webhook endpoint.
fn validate_webhook_url(raw: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(raw).map_err(|_| ConfigError::InvalidWebhookUrl(raw.to_string()))?;

    let host_ok = matches!(url.host_str(), Some("discord.com" | "discordapp.com"));
    let path_ok =
        url.path().starts_with("/api/webhooks/") && url.path().len() > "/api/webhooks/".len();

    if url.scheme() == "https" && host_ok && path_ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidWebhookUrl(raw.to_string()))
    }
}
