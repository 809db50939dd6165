//! Rolling-window statistics for the CVD series.
//!
//! The window keeps `(timestamp, cvd, delta)` points inside a fixed horizon
//! with running sums, so pushing a point and reading both z-scores is O(1)
//! amortized. Statistics use the population standard deviation; with fewer
//! than two points, or a degenerate deviation, z-scores are zero.

use std::collections::VecDeque;

/// Minimum points before a z-score is meaningful.
const MIN_POINTS: usize = 2;

/// Signed log transform: `sign(v)·ln(|v|)` when `|v| >= 1`, else 0.
///
/// Compresses large z-scores into a bounded comparable space while mapping
/// the noise band `(-1, 1)` to zero.
#[must_use]
pub fn signed_log(v: f64) -> f64 {
    if v.abs() >= 1.0 {
        v.signum() * v.abs().ln()
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowPoint {
    timestamp: i64,
    cvd: f64,
    delta: f64,
}

/// Sliding time window over the cumulative and delta series.
#[derive(Debug)]
pub struct RollingWindow {
    horizon_ms: i64,
    points: VecDeque<WindowPoint>,
    sum_cvd: f64,
    sum_cvd_sq: f64,
    sum_delta: f64,
    sum_delta_sq: f64,
}

impl RollingWindow {
    #[must_use]
    pub fn new(horizon_ms: i64) -> Self {
        Self {
            horizon_ms,
            points: VecDeque::new(),
            sum_cvd: 0.0,
            sum_cvd_sq: 0.0,
            sum_delta: 0.0,
            sum_delta_sq: 0.0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Appends a point and expires everything beyond the horizon.
    pub fn push(&mut self, timestamp: i64, cvd: f64, delta: f64) {
        self.points.push_back(WindowPoint {
            timestamp,
            cvd,
            delta,
        });
        self.sum_cvd += cvd;
        self.sum_cvd_sq += cvd * cvd;
        self.sum_delta += delta;
        self.sum_delta_sq += delta * delta;
        self.prune(timestamp);
    }

    fn prune(&mut self, now_ts: i64) {
        let cutoff = now_ts - self.horizon_ms;
        while self
            .points
            .front()
            .is_some_and(|p| p.timestamp < cutoff)
        {
            if let Some(expired) = self.points.pop_front() {
                self.sum_cvd -= expired.cvd;
                self.sum_cvd_sq -= expired.cvd * expired.cvd;
                self.sum_delta -= expired.delta;
                self.sum_delta_sq -= expired.delta * expired.delta;
            }
        }
    }

    /// Mean and population standard deviation of the cumulative series.
    #[must_use]
    pub fn cvd_stats(&self) -> (f64, f64) {
        moments(self.points.len(), self.sum_cvd, self.sum_cvd_sq)
    }

    /// Mean and population standard deviation of the delta series.
    #[must_use]
    pub fn delta_stats(&self) -> (f64, f64) {
        moments(self.points.len(), self.sum_delta, self.sum_delta_sq)
    }

    /// Z-scores of a `(cvd, delta)` observation against the window.
    #[must_use]
    pub fn z_scores(&self, cvd: f64, delta: f64) -> (f64, f64) {
        if self.points.len() < MIN_POINTS {
            return (0.0, 0.0);
        }
        let (cvd_mean, cvd_std) = self.cvd_stats();
        let (delta_mean, delta_std) = self.delta_stats();
        (
            z_score(cvd, cvd_mean, cvd_std),
            z_score(delta, delta_mean, delta_std),
        )
    }
}

fn moments(n: usize, sum: f64, sum_sq: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let count = n as f64;
    let mean = sum / count;
    // Running-sum cancellation can push the variance marginally negative.
    let variance = (sum_sq / count - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

fn z_score(x: f64, mean: f64, std: f64) -> f64 {
    if std > 0.0 {
        (x - mean) / std
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // signed_log
    // =========================================================================

    #[test]
    fn test_signed_log_maps_noise_band_to_zero() {
        assert_eq!(signed_log(0.0), 0.0);
        assert_eq!(signed_log(0.99), 0.0);
        assert_eq!(signed_log(-0.99), 0.0);
    }

    #[test]
    fn test_signed_log_preserves_sign() {
        assert!((signed_log(10.0) - 10.0_f64.ln()).abs() < 1e-12);
        assert!((signed_log(-10.0) + 10.0_f64.ln()).abs() < 1e-12);
        assert_eq!(signed_log(1.0), 0.0);
        assert_eq!(signed_log(std::f64::consts::E).round(), 1.0);
    }

    // =========================================================================
    // RollingWindow
    // =========================================================================

    #[test]
    fn test_window_stats_match_direct_computation() {
        let mut window = RollingWindow::new(1_000_000);
        for (i, cvd) in [2.0, 4.0, 6.0, 8.0].iter().enumerate() {
            window.push(i as i64, *cvd, 2.0);
        }

        let (mean, std) = window.cvd_stats();
        assert!((mean - 5.0).abs() < 1e-12);
        // Population std of [2,4,6,8] = sqrt(5).
        assert!((std - 5.0_f64.sqrt()).abs() < 1e-12);

        let (delta_mean, delta_std) = window.delta_stats();
        assert!((delta_mean - 2.0).abs() < 1e-12);
        assert!(delta_std.abs() < 1e-9);
    }

    #[test]
    fn test_window_expires_old_points() {
        let mut window = RollingWindow::new(100);
        window.push(0, 10.0, 10.0);
        window.push(50, 20.0, 10.0);
        assert_eq!(window.len(), 2);

        // Point at t=0 falls out of the [60, 160] horizon.
        window.push(160, 30.0, 10.0);
        assert_eq!(window.len(), 2);

        let (mean, _) = window.cvd_stats();
        assert!((mean - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_z_scores_zero_with_too_few_points() {
        let mut window = RollingWindow::new(1_000);
        assert_eq!(window.z_scores(1.0, 1.0), (0.0, 0.0));

        window.push(0, 1.0, 1.0);
        assert_eq!(window.z_scores(5.0, 5.0), (0.0, 0.0));
    }

    #[test]
    fn test_z_scores_zero_with_degenerate_deviation() {
        let mut window = RollingWindow::new(1_000);
        window.push(0, 3.0, 1.0);
        window.push(1, 3.0, 1.0);
        window.push(2, 3.0, 1.0);

        // All points identical: sigma is zero on both series.
        assert_eq!(window.z_scores(3.0, 1.0), (0.0, 0.0));
    }

    #[test]
    fn test_z_scores_detect_outlier() {
        let mut window = RollingWindow::new(i64::MAX / 2);
        // Tight oscillation around zero, then a large spike.
        for i in 0..100 {
            let delta = if i % 2 == 0 { 1.0 } else { -1.0 };
            let cvd = if i % 2 == 0 { 1.0 } else { 0.0 };
            window.push(i, cvd, delta);
        }
        window.push(100, 1000.0, 1000.0);

        let (z, dz) = window.z_scores(1000.0, 1000.0);
        assert!(z > 9.0, "cumulative z-score should be extreme, got {z}");
        assert!(dz > 9.0, "delta z-score should be extreme, got {dz}");
    }
}
