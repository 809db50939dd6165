//! Persisted CVD series points.

use serde::{Deserialize, Serialize};

/// One point of an aggregator's CVD series, keyed on
/// `(aggregator_id, timestamp)`; repeated timestamps overwrite latest-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CvdRecord {
    /// Logical aggregator symbol, distinct from exchange symbols.
    pub aggregator_id: String,
    /// Trade time the point was computed at (ms).
    pub timestamp: i64,
    /// Running cumulative volume delta.
    pub cvd_value: f64,
    /// Z-score of the cumulative series over the rolling window.
    pub z_score: f64,
    /// Signed volume contributed at this point.
    pub delta: f64,
    /// Z-score of the delta series over the rolling window.
    pub delta_z_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cvd_record_serde_roundtrip() {
        let record = CvdRecord {
            aggregator_id: "BTC".to_string(),
            timestamp: 1_700_000_000_000,
            cvd_value: 123.456,
            z_score: 2.5,
            delta: -1.5,
            delta_z_score: -0.75,
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: CvdRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
