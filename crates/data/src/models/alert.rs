//! Alert queue entries and their payload.

use serde::{Deserialize, Serialize};

/// Alert type emitted by the CVD worker.
pub const ALERT_TYPE_CVD: &str = "cvd_zscore";

/// Maximum stored length of a queue entry's last error message.
pub const MAX_ERROR_LEN: usize = 512;

/// Which series crossed the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    #[serde(rename = "cumulative")]
    Cumulative,
    #[serde(rename = "delta")]
    Delta,
}

impl TriggerSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cumulative => "cumulative",
            Self::Delta => "delta",
        }
    }
}

/// Alert payload persisted to the queue and posted downstream.
///
/// Carries both the raw and log-domain threshold and trigger values so
/// formatting can present whichever the operator configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvdAlertPayload {
    pub alert_type: String,
    /// Aggregator id (logical symbol).
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Trigger time (ms).
    pub timestamp: i64,
    pub trigger_source: TriggerSource,
    /// Z-score of the triggering series, raw domain.
    pub trigger_z_score: f64,
    pub z_score: f64,
    pub delta: f64,
    pub delta_z_score: f64,
    /// Configured threshold, log domain.
    pub threshold: f64,
    /// `exp(threshold)`.
    pub raw_threshold: f64,
    /// `sign(t)·ln(|t|)` of the trigger z-score.
    pub log_trigger_z_score: f64,
    pub raw_trigger_z_score: f64,
    pub cumulative_value: f64,
}

/// One alert queue row.
///
/// Lifecycle: enqueued -> attempts increment -> processed (success, error
/// cleared) or terminal (retry limit, error preserved). `processed_at` is
/// null exactly while the entry is still eligible for an attempt.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertQueueRecord {
    pub id: i64,
    pub alert_type: String,
    pub symbol: String,
    pub timestamp: i64,
    pub trigger_source: String,
    pub trigger_z_score: f64,
    pub z_score: f64,
    pub delta: f64,
    pub delta_z_score: f64,
    pub threshold: f64,
    pub cumulative_value: f64,
    /// Full payload as JSON.
    pub payload: String,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub processed_at: Option<i64>,
    pub created_at: i64,
}

impl AlertQueueRecord {
    /// Decodes the stored payload.
    ///
    /// # Errors
    /// Returns an error when the stored JSON no longer matches the payload
    /// shape.
    pub fn parse_payload(&self) -> anyhow::Result<CvdAlertPayload> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> CvdAlertPayload {
        CvdAlertPayload {
            alert_type: ALERT_TYPE_CVD.to_string(),
            symbol: "BTC".to_string(),
            display_name: Some("Bitcoin".to_string()),
            timestamp: 1_700_000_000_000,
            trigger_source: TriggerSource::Cumulative,
            trigger_z_score: 10.0,
            z_score: 10.0,
            delta: 1.25,
            delta_z_score: 0.5,
            threshold: 2.0,
            raw_threshold: 2.0_f64.exp(),
            log_trigger_z_score: 10.0_f64.ln(),
            raw_trigger_z_score: 10.0,
            cumulative_value: 512.75,
        }
    }

    #[test]
    fn test_payload_roundtrip_is_bit_exact() {
        let payload = sample_payload();
        let json = serde_json::to_string(&payload).unwrap();
        let back: CvdAlertPayload = serde_json::from_str(&json).unwrap();

        assert_eq!(payload, back);
        // f64 fields must recover bit-exactly, including irrational values.
        assert_eq!(back.raw_threshold.to_bits(), payload.raw_threshold.to_bits());
        assert_eq!(
            back.log_trigger_z_score.to_bits(),
            payload.log_trigger_z_score.to_bits()
        );
    }

    #[test]
    fn test_payload_uses_camel_case_keys() {
        let json = serde_json::to_string(&sample_payload()).unwrap();
        assert!(json.contains("\"triggerZScore\""));
        assert!(json.contains("\"cumulativeValue\""));
        assert!(json.contains("\"triggerSource\":\"cumulative\""));
    }

    #[test]
    fn test_queue_record_pending() {
        let record = AlertQueueRecord {
            id: 1,
            alert_type: ALERT_TYPE_CVD.to_string(),
            symbol: "BTC".to_string(),
            timestamp: 0,
            trigger_source: "cumulative".to_string(),
            trigger_z_score: 0.0,
            z_score: 0.0,
            delta: 0.0,
            delta_z_score: 0.0,
            threshold: 2.0,
            cumulative_value: 0.0,
            payload: "{}".to_string(),
            attempt_count: 0,
            last_error: None,
            processed_at: None,
            created_at: 0,
        };
        assert!(record.is_pending());
    }
}
