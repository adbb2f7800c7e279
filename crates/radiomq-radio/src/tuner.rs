//! Adaptive RSSI threshold
//!
//! Receptions that trigger on noise and never see a sync word end in a
//! receive timeout. The tuner watches the timeout rate over a fixed period
//! and nudges the chip's RSSI threshold so that rate stays inside a band.

use std::time::{Duration, Instant};

/// Default evaluation period
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);

/// Timeouts per second above which the threshold is raised
pub const DEFAULT_UPPER_RATE: f64 = 10.0;

/// Timeouts per second below which the threshold is lowered
pub const DEFAULT_LOWER_RATE: f64 = 2.5;

/// Threshold adjustment decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdStep {
    /// Require a stronger signal (less sensitive)
    Raise,
    /// Accept a weaker signal (more sensitive)
    Lower,
    /// Leave the threshold alone
    Hold,
}

/// Timeout-rate controller
#[derive(Debug, Clone)]
pub struct ThresholdTuner {
    period: Duration,
    upper: f64,
    lower: f64,
    timeouts: u64,
    since: Instant,
}

impl ThresholdTuner {
    /// Create a tuner with the default band and period
    pub fn new() -> Self {
        Self::with_band(DEFAULT_PERIOD, DEFAULT_LOWER_RATE, DEFAULT_UPPER_RATE)
    }

    /// Create a tuner with a custom period and band
    pub fn with_band(period: Duration, lower: f64, upper: f64) -> Self {
        Self {
            period,
            upper,
            lower,
            timeouts: 0,
            since: Instant::now(),
        }
    }

    /// Evaluation period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Count one receive timeout
    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    /// Decision for a given timeout rate
    pub fn decide(&self, rate: f64) -> ThresholdStep {
        if rate > self.upper {
            ThresholdStep::Raise
        } else if rate < self.lower {
            ThresholdStep::Lower
        } else {
            ThresholdStep::Hold
        }
    }

    /// Close the current window if a full period has passed
    ///
    /// Returns the observed rate and the decision, and starts a new window.
    pub fn evaluate(&mut self, now: Instant) -> Option<(f64, ThresholdStep)> {
        let elapsed = now.saturating_duration_since(self.since);
        if elapsed < self.period {
            return None;
        }
        let rate = self.timeouts as f64 / elapsed.as_secs_f64();
        self.timeouts = 0;
        self.since = now;
        Some((rate, self.decide(rate)))
    }
}

impl Default for ThresholdTuner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band() {
        let tuner = ThresholdTuner::new();
        assert_eq!(tuner.decide(12.0), ThresholdStep::Raise);
        assert_eq!(tuner.decide(1.0), ThresholdStep::Lower);
        assert_eq!(tuner.decide(5.0), ThresholdStep::Hold);
        assert_eq!(tuner.decide(10.0), ThresholdStep::Hold);
        assert_eq!(tuner.decide(2.5), ThresholdStep::Hold);
    }

    #[test]
    fn test_window() {
        let start = Instant::now();
        let mut tuner = ThresholdTuner::with_band(Duration::from_secs(10), 2.5, 10.0);
        tuner.since = start;
        for _ in 0..150 {
            tuner.record_timeout();
        }
        assert!(tuner.evaluate(start + Duration::from_secs(5)).is_none());

        let (rate, step) = tuner.evaluate(start + Duration::from_secs(10)).unwrap();
        assert!((rate - 15.0).abs() < 1e-9);
        assert_eq!(step, ThresholdStep::Raise);

        // fresh window with no timeouts
        let (rate, step) = tuner.evaluate(start + Duration::from_secs(20)).unwrap();
        assert_eq!(rate, 0.0);
        assert_eq!(step, ThresholdStep::Lower);
    }

    #[test]
    fn test_converges_into_band() {
        // Noise model: each register step below 200 doubles the false
        // trigger rate. Register value is -2x the threshold in dBm, so a
        // smaller register means a higher (less sensitive) threshold.
        let rate_at = |reg: u8| 0.5 * 2f64.powi(reg as i32 - 200);
        let tuner = ThresholdTuner::new();

        for start in [180u8, 200, 215] {
            let mut reg = start;
            for _ in 0..50 {
                match tuner.decide(rate_at(reg)) {
                    ThresholdStep::Raise => reg -= 1,
                    ThresholdStep::Lower => reg += 1,
                    ThresholdStep::Hold => break,
                }
            }
            let rate = rate_at(reg);
            assert!((2.5..=10.0).contains(&rate), "start {start}: rate {rate}");
        }
    }
}
