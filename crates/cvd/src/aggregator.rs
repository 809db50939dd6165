//! Incremental per-aggregator CVD state.
//!
//! Every matching trade advances the running cumulative volume delta,
//! appends one point to the rolling window, and yields one series record.
//! When the signed-log of the dominant z-score clears the configured
//! log-domain threshold and alerts are enabled, an alert payload is yielded
//! alongside (suppression is the worker's concern).

use binance_feed_core::groups::AggregatorGroup;
use binance_feed_data::{
    CvdAlertPayload, CvdRecord, TradeRecord, TradeStreamFilter, TriggerSource, ALERT_TYPE_CVD,
};

use crate::stats::{signed_log, RollingWindow};

/// Incremental CVD state for one aggregator.
pub struct CvdAggregator {
    group: AggregatorGroup,
    filters: Vec<TradeStreamFilter>,
    /// Configured threshold, log domain.
    threshold_log: f64,
    cvd_value: f64,
    window: RollingWindow,
}

impl CvdAggregator {
    #[must_use]
    pub fn new(group: AggregatorGroup, history_window_ms: i64, threshold_log: f64) -> Self {
        let filters = group
            .streams
            .iter()
            .map(|s| TradeStreamFilter {
                symbol: s.symbol.to_uppercase(),
                venue: s.market_type,
                stream_type: s.effective_stream_type(),
            })
            .collect();

        Self {
            group,
            filters,
            threshold_log,
            cvd_value: 0.0,
            window: RollingWindow::new(history_window_ms),
        }
    }

    /// Aggregator id (logical symbol).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.group.id
    }

    /// Trade predicates for the store cursor query.
    #[must_use]
    pub fn filters(&self) -> &[TradeStreamFilter] {
        &self.filters
    }

    /// Whether this aggregator may produce alert payloads.
    #[must_use]
    pub fn alerts_enabled(&self) -> bool {
        self.group.alerts_enabled
    }

    /// Current cumulative value (diagnostics and tests).
    #[must_use]
    pub fn cvd_value(&self) -> f64 {
        self.cvd_value
    }

    /// Rebuilds the window from the persisted series after a restart.
    pub fn warm_start(&mut self, records: &[CvdRecord]) {
        for record in records {
            self.window
                .push(record.timestamp, record.cvd_value, record.delta);
        }
        if let Some(last) = records.last() {
            self.cvd_value = last.cvd_value;
        }
    }

    /// Feeds one trade; returns the series point and, when the threshold is
    /// cleared, the alert payload.
    pub fn process_trade(&mut self, trade: &TradeRecord) -> (CvdRecord, Option<CvdAlertPayload>) {
        let delta = trade.signed_amount();
        self.cvd_value += delta;
        self.window.push(trade.timestamp, self.cvd_value, delta);

        let (z_score, delta_z_score) = self.window.z_scores(self.cvd_value, delta);

        let record = CvdRecord {
            aggregator_id: self.group.id.clone(),
            timestamp: trade.timestamp,
            cvd_value: self.cvd_value,
            z_score,
            delta,
            delta_z_score,
        };

        let (trigger_source, trigger_z_score) = if delta_z_score.abs() > z_score.abs() {
            (TriggerSource::Delta, delta_z_score)
        } else {
            (TriggerSource::Cumulative, z_score)
        };
        let log_trigger = signed_log(trigger_z_score);

        let alert = (self.group.alerts_enabled && log_trigger.abs() >= self.threshold_log).then(
            || CvdAlertPayload {
                alert_type: ALERT_TYPE_CVD.to_string(),
                symbol: self.group.id.clone(),
                display_name: self.group.display_name.clone(),
                timestamp: trade.timestamp,
                trigger_source,
                trigger_z_score,
                z_score,
                delta,
                delta_z_score,
                threshold: self.threshold_log,
                raw_threshold: self.threshold_log.exp(),
                log_trigger_z_score: log_trigger,
                raw_trigger_z_score: trigger_z_score,
                cumulative_value: self.cvd_value,
            },
        );

        (record, alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binance_feed_core::groups::StreamSpec;
    use binance_feed_core::{StreamType, TradeSide, Venue};

    fn group(alerts_enabled: bool) -> AggregatorGroup {
        AggregatorGroup {
            id: "BTC".to_string(),
            display_name: Some("Bitcoin".to_string()),
            streams: vec![
                StreamSpec {
                    symbol: "btcusdt".to_string(),
                    market_type: Venue::Spot,
                    stream_type: None,
                },
                StreamSpec {
                    symbol: "BTCUSDT".to_string(),
                    market_type: Venue::UsdM,
                    stream_type: Some(StreamType::AggTrade),
                },
            ],
            alerts_enabled,
        }
    }

    fn trade(trade_id: i64, timestamp: i64, amount: f64, side: TradeSide) -> TradeRecord {
        TradeRecord {
            symbol: "BTCUSDT".to_string(),
            venue: Venue::Spot,
            trade_id,
            timestamp,
            price: 50_000.0,
            amount,
            direction: side,
            stream_type: StreamType::AggTrade,
        }
    }

    const WINDOW_72H: i64 = 72 * 3600 * 1000;

    #[test]
    fn test_filters_are_uppercased_with_default_stream_type() {
        let aggregator = CvdAggregator::new(group(true), WINDOW_72H, 2.0);
        let filters = aggregator.filters();

        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].symbol, "BTCUSDT");
        assert_eq!(filters[0].stream_type, StreamType::AggTrade);
        assert_eq!(filters[1].venue, Venue::UsdM);
    }

    #[test]
    fn test_cvd_accumulates_signed_amounts() {
        let mut aggregator = CvdAggregator::new(group(true), WINDOW_72H, 2.0);

        let (r1, _) = aggregator.process_trade(&trade(1, 1_000, 2.0, TradeSide::Buy));
        assert_eq!(r1.cvd_value, 2.0);
        assert_eq!(r1.delta, 2.0);

        let (r2, _) = aggregator.process_trade(&trade(2, 2_000, 0.5, TradeSide::Sell));
        assert_eq!(r2.cvd_value, 1.5);
        assert_eq!(r2.delta, -0.5);

        assert_eq!(aggregator.cvd_value(), 1.5);
    }

    #[test]
    fn test_early_records_have_zero_z_scores() {
        let mut aggregator = CvdAggregator::new(group(true), WINDOW_72H, 2.0);
        let (record, alert) = aggregator.process_trade(&trade(1, 1_000, 100.0, TradeSide::Buy));

        assert_eq!(record.z_score, 0.0);
        assert_eq!(record.delta_z_score, 0.0);
        assert!(alert.is_none());
    }

    /// Drives the aggregator into an extreme z-score and checks the full
    /// threshold transformation on the emitted payload.
    #[test]
    fn test_alert_payload_carries_raw_and_log_domain_values() {
        let mut aggregator = CvdAggregator::new(group(true), WINDOW_72H, 2.0);

        // Tight oscillation, then a spike.
        for i in 0..100 {
            let side = if i % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell };
            aggregator.process_trade(&trade(i, 1_000 + i, 1.0, side));
        }
        let (record, alert) =
            aggregator.process_trade(&trade(200, 2_000, 1_000.0, TradeSide::Buy));

        let payload = alert.expect("spike must trigger an alert");
        assert!(record.z_score > 7.389, "z = {}", record.z_score);

        assert_eq!(payload.alert_type, ALERT_TYPE_CVD);
        assert_eq!(payload.symbol, "BTC");
        assert_eq!(payload.display_name.as_deref(), Some("Bitcoin"));
        assert_eq!(payload.threshold, 2.0);
        assert!((payload.raw_threshold - 2.0_f64.exp()).abs() < 1e-12);
        assert_eq!(payload.raw_trigger_z_score, payload.trigger_z_score);
        assert!(
            (payload.log_trigger_z_score - payload.trigger_z_score.abs().ln()).abs() < 1e-12
        );
        assert!(payload.log_trigger_z_score >= 2.0);
        assert_eq!(payload.cumulative_value, record.cvd_value);
    }

    #[test]
    fn test_trigger_source_is_dominant_series() {
        let mut aggregator = CvdAggregator::new(group(true), WINDOW_72H, 0.1);

        for i in 0..100 {
            let side = if i % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell };
            aggregator.process_trade(&trade(i, 1_000 + i, 1.0, side));
        }
        let (record, alert) =
            aggregator.process_trade(&trade(200, 2_000, 1_000.0, TradeSide::Buy));

        let payload = alert.expect("low threshold must trigger");
        match payload.trigger_source {
            TriggerSource::Cumulative => {
                assert!(record.z_score.abs() >= record.delta_z_score.abs());
                assert_eq!(payload.trigger_z_score, record.z_score);
            }
            TriggerSource::Delta => {
                assert!(record.delta_z_score.abs() > record.z_score.abs());
                assert_eq!(payload.trigger_z_score, record.delta_z_score);
            }
        }
    }

    #[test]
    fn test_disabled_aggregator_never_alerts() {
        let mut aggregator = CvdAggregator::new(group(false), WINDOW_72H, 0.001);

        for i in 0..100 {
            let side = if i % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell };
            aggregator.process_trade(&trade(i, 1_000 + i, 1.0, side));
        }
        let (_, alert) = aggregator.process_trade(&trade(200, 2_000, 1_000.0, TradeSide::Buy));
        assert!(alert.is_none());
    }

    #[test]
    fn test_sub_threshold_z_scores_do_not_alert() {
        // Threshold 2.0 in log domain means the raw trigger must reach e^2.
        let mut aggregator = CvdAggregator::new(group(true), WINDOW_72H, 2.0);

        // A mild trend produces small z-scores.
        for i in 0..10 {
            let (_, alert) = aggregator.process_trade(&trade(i, 1_000 + i, 1.0, TradeSide::Buy));
            assert!(alert.is_none());
        }
    }

    #[test]
    fn test_warm_start_restores_cvd_and_window() {
        let mut aggregator = CvdAggregator::new(group(true), WINDOW_72H, 2.0);

        let history = vec![
            CvdRecord {
                aggregator_id: "BTC".to_string(),
                timestamp: 1_000,
                cvd_value: 5.0,
                z_score: 0.0,
                delta: 5.0,
                delta_z_score: 0.0,
            },
            CvdRecord {
                aggregator_id: "BTC".to_string(),
                timestamp: 2_000,
                cvd_value: 3.0,
                z_score: 0.0,
                delta: -2.0,
                delta_z_score: 0.0,
            },
        ];
        aggregator.warm_start(&history);

        assert_eq!(aggregator.cvd_value(), 3.0);

        let (record, _) = aggregator.process_trade(&trade(3, 3_000, 2.0, TradeSide::Buy));
        assert_eq!(record.cvd_value, 5.0);
        // The restored window contributes to the statistics.
        assert_ne!(record.z_score, 0.0);
    }
}
