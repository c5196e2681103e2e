//! Trend-based predictive alerting
//!
//! Keeps a short per-source history of `(taken_at, value)` points, fits a
//! least-squares line over elapsed time and projects each source forward
//! over a fixed horizon. Rules are checked against the projected value; a
//! rule the current sample already breaks is left to the threshold
//! evaluator.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::evaluator::{Evaluator, RuleSet};
use crate::models::{Alert, AlertKind, Sample, Snapshot};

/// Minimum points before a projection is attempted
pub const MIN_TREND_SAMPLES: usize = 5;

/// Configuration for the trend predictor
#[derive(Debug, Clone)]
pub struct TrendConfig {
    /// How far ahead to project (default: 5 minutes)
    pub horizon: Duration,
    /// Points kept per source
    pub window: usize,
    /// Points required before projecting
    pub min_samples: usize,
    /// Fits with an R² below this are too noisy to project (default: 0.5)
    pub min_confidence: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::from_secs(300),
            window: 20,
            min_samples: MIN_TREND_SAMPLES,
            min_confidence: 0.5,
        }
    }
}

/// Least-squares line through `(x, y)` points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination; 1.0 for a perfect (or flat) fit
    pub r_squared: f64,
}

impl TrendFit {
    /// Fit a line, or `None` when fewer than two distinct x values exist
    pub fn fit(points: &[(f64, f64)]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }

        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
        let (sxx, sxy, syy) = points
            .iter()
            .fold((0.0, 0.0, 0.0), |(sxx, sxy, syy), (x, y)| {
                let dx = x - mean_x;
                let dy = y - mean_y;
                (sxx + dx * dx, sxy + dx * dy, syy + dy * dy)
            });
        if sxx < f64::EPSILON {
            return None;
        }

        let slope = sxy / sxx;
        let r_squared = if syy < f64::EPSILON {
            1.0
        } else {
            (sxy * sxy / (sxx * syy)).clamp(0.0, 1.0)
        };

        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
            r_squared,
        })
    }

    /// Value of the fitted line at `x`
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

type History = VecDeque<(DateTime<Utc>, f64)>;

/// Projects sources forward and raises [`AlertKind::Predicted`] alerts
pub struct TrendPredictor {
    config: TrendConfig,
    history: Mutex<HashMap<String, History>>,
}

impl TrendPredictor {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }
}

/// Seconds from `origin` to `at`
fn elapsed_secs(origin: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    (at - origin).num_milliseconds() as f64 / 1000.0
}

impl Evaluator for TrendPredictor {
    fn evaluate(&self, snapshot: &Snapshot, rules: &RuleSet) -> Vec<Alert> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.config.window.max(2);
        let horizon = chrono::Duration::from_std(self.config.horizon)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let target = snapshot.taken_at + horizon;
        let mut alerts = Vec::new();

        for sample in &snapshot.samples {
            let points = history.entry(sample.source_name.clone()).or_default();
            points.push_back((snapshot.taken_at, sample.value));
            while points.len() > window {
                points.pop_front();
            }
            if points.len() < self.config.min_samples.max(2) {
                continue;
            }

            let origin = points[0].0;
            let xy: Vec<(f64, f64)> = points
                .iter()
                .map(|(at, value)| (elapsed_secs(origin, *at), *value))
                .collect();
            let Some(fit) = TrendFit::fit(&xy) else {
                continue;
            };
            if fit.r_squared < self.config.min_confidence {
                continue;
            }

            let projected = fit.at(elapsed_secs(origin, target));
            if !projected.is_finite() {
                continue;
            }
            let projected_sample = Sample::new(sample.source_name.clone(), projected, target);
            let kind = AlertKind::Predicted {
                horizon: self.config.horizon,
                confidence: fit.r_squared,
            };

            for rule in rules.matching(&sample.source_name) {
                if rule.margin(sample.value).is_some() {
                    continue;
                }
                if let Some(alert) =
                    RuleSet::check(rule, &projected_sample, kind, snapshot.taken_at)
                {
                    debug!(
                        source = %sample.source_name,
                        rule_id = %rule.id,
                        current = sample.value,
                        projected = projected,
                        confidence = fit.r_squared,
                        "Projected threshold violation"
                    );
                    alerts.push(alert);
                }
            }
        }

        alerts
    }

    fn reset(&self) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThresholdRule;

    fn snapshot_at(base: DateTime<Utc>, secs: i64, name: &str, value: f64) -> Snapshot {
        let taken_at = base + chrono::Duration::seconds(secs);
        Snapshot {
            taken_at,
            samples: vec![Sample::new(name, value, taken_at)],
            failed: vec![],
        }
    }

    fn predictor() -> TrendPredictor {
        TrendPredictor::new(TrendConfig {
            horizon: Duration::from_secs(50),
            window: 10,
            min_samples: 5,
            min_confidence: 0.5,
        })
    }

    fn cpu_rules() -> RuleSet {
        RuleSet::new([ThresholdRule::above("cpu-high", "cpu", 80.0)]).unwrap()
    }

    #[test]
    fn test_fit_recovers_line() {
        let fit = TrendFit::fit(&[(0.0, 1.0), (1.0, 2.0), (2.0, 3.0), (3.0, 4.0)]).unwrap();
        assert!((fit.slope - 1.0).abs() < 1e-9);
        assert!((fit.at(5.0) - 6.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);

        let flat = TrendFit::fit(&[(0.0, 5.0), (1.0, 5.0), (2.0, 5.0)]).unwrap();
        assert_eq!(flat.slope, 0.0);
        assert_eq!(flat.r_squared, 1.0);

        assert!(TrendFit::fit(&[(1.0, 1.0)]).is_none());
        assert!(TrendFit::fit(&[(2.0, 1.0), (2.0, 3.0)]).is_none());
    }

    #[test]
    fn test_rising_trend_predicts_alert() {
        let predictor = predictor();
        let rules = cpu_rules();
        let base = Utc::now();

        // +0.5 per second; 50s past t=40 lands on 85
        let mut alerts = Vec::new();
        for (secs, value) in [(0, 40.0), (10, 45.0), (20, 50.0), (30, 55.0), (40, 60.0)] {
            alerts = predictor.evaluate(&snapshot_at(base, secs, "cpu", value), &rules);
        }

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.rule_id, "cpu-high");
        assert!((alert.sample.value - 85.0).abs() < 1e-9);
        assert!((alert.margin - 5.0).abs() < 1e-9);
        match alert.kind {
            AlertKind::Predicted {
                horizon,
                confidence,
            } => {
                assert_eq!(horizon, Duration::from_secs(50));
                assert!((confidence - 1.0).abs() < 1e-9);
            }
            other => panic!("expected predicted alert, got {:?}", other),
        }
        assert_eq!(
            alert.sample.timestamp,
            base + chrono::Duration::seconds(90)
        );
    }

    #[test]
    fn test_uneven_spacing_uses_elapsed_time() {
        let predictor = predictor();
        let rules = cpu_rules();
        let base = Utc::now();

        // The round at t=30 is missing; the slope is still 0.5 per second
        let mut alerts = Vec::new();
        for (secs, value) in [(0, 40.0), (10, 45.0), (20, 50.0), (40, 60.0), (50, 65.0)] {
            alerts = predictor.evaluate(&snapshot_at(base, secs, "cpu", value), &rules);
        }

        assert_eq!(alerts.len(), 1);
        assert!((alerts[0].sample.value - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_noisy_history_is_not_projected() {
        let predictor = predictor();
        let rules = cpu_rules();
        let base = Utc::now();

        let mut alerts = Vec::new();
        for (secs, value) in [(0, 20.0), (10, 78.0), (20, 25.0), (30, 79.0), (40, 30.0)] {
            alerts = predictor.evaluate(&snapshot_at(base, secs, "cpu", value), &rules);
        }
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_needs_minimum_history() {
        let predictor = predictor();
        let rules = cpu_rules();
        let base = Utc::now();

        for (secs, value) in [(0, 40.0), (10, 60.0), (20, 79.0)] {
            assert!(predictor
                .evaluate(&snapshot_at(base, secs, "cpu", value), &rules)
                .is_empty());
        }
    }

    #[test]
    fn test_current_violation_is_not_predicted() {
        let predictor = predictor();
        let rules = cpu_rules();
        let base = Utc::now();

        let mut alerts = Vec::new();
        for (secs, value) in [(0, 70.0), (10, 75.0), (20, 80.0), (30, 85.0), (40, 90.0)] {
            alerts = predictor.evaluate(&snapshot_at(base, secs, "cpu", value), &rules);
        }
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_reset_clears_history() {
        let predictor = predictor();
        let rules = cpu_rules();
        let base = Utc::now();

        for (secs, value) in [(0, 40.0), (10, 45.0), (20, 50.0), (30, 55.0)] {
            predictor.evaluate(&snapshot_at(base, secs, "cpu", value), &rules);
        }
        predictor.reset();

        assert!(predictor
            .evaluate(&snapshot_at(base, 40, "cpu", 60.0), &rules)
            .is_empty());
    }
}
