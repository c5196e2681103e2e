//! Core data models for the health monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SourceError;

/// Default critical margin as a fraction of the rule limit
pub const DEFAULT_CRITICAL_MARGIN_RATIO: f64 = 0.15;

/// One timestamped reading from a metric source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub source_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(source_name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_name: source_name.into(),
            value,
            timestamp,
        }
    }

    /// Create a sample stamped with the current wall-clock time
    pub fn now(source_name: impl Into<String>, value: f64) -> Self {
        Self::new(source_name, value, Utc::now())
    }
}

/// A source that produced no usable sample in a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_name: String,
    pub reason: SourceError,
}

/// Samples gathered in one polling round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    /// Ordered by source registration order
    pub samples: Vec<Sample>,
    pub failed: Vec<SourceFailure>,
}

impl Snapshot {
    /// A round in which no source produced a sample
    pub fn failed_round(taken_at: DateTime<Utc>, failed: Vec<SourceFailure>) -> Self {
        Self {
            taken_at,
            samples: Vec::new(),
            failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, source_name: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.source_name == source_name)
    }

    pub fn failed_names(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|f| f.source_name.as_str())
    }
}

/// Direction in which a rule limit is violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Above,
    Below,
}

impl Comparison {
    pub fn violates(&self, value: f64, limit: f64) -> bool {
        match self {
            Comparison::Above => value > limit,
            Comparison::Below => value < limit,
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparison::Above => write!(f, "above"),
            Comparison::Below => write!(f, "below"),
        }
    }
}

/// Alerting limit applied to every source whose name matches `pattern`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub id: String,
    /// Glob over source names: `*` matches any run, `?` a single character
    pub pattern: String,
    pub limit: f64,
    pub comparison: Comparison,
    /// Margin at which an alert becomes critical (default: 15% of the limit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_margin: Option<f64>,
}

impl ThresholdRule {
    pub fn above(id: impl Into<String>, pattern: impl Into<String>, limit: f64) -> Self {
        Self {
            id: id.into(),
            pattern: pattern.into(),
            limit,
            comparison: Comparison::Above,
            critical_margin: None,
        }
    }

    pub fn below(id: impl Into<String>, pattern: impl Into<String>, limit: f64) -> Self {
        Self {
            comparison: Comparison::Below,
            ..Self::above(id, pattern, limit)
        }
    }

    pub fn with_critical_margin(mut self, margin: f64) -> Self {
        self.critical_margin = Some(margin);
        self
    }

    /// Returns the violation margin if `value` breaks this rule
    pub fn margin(&self, value: f64) -> Option<f64> {
        if self.comparison.violates(value, self.limit) {
            Some((value - self.limit).abs())
        } else {
            None
        }
    }

    pub fn severity_for(&self, margin: f64) -> AlertSeverity {
        let critical = self
            .critical_margin
            .unwrap_or(self.limit.abs() * DEFAULT_CRITICAL_MARGIN_RATIO);
        if margin >= critical {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        }
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Whether an alert was raised on an observed or a projected value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AlertKind {
    Threshold,
    Predicted {
        horizon: Duration,
        /// Goodness of fit (R²) of the trend behind the projection, 0.0-1.0
        confidence: f64,
    },
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Threshold => write!(f, "threshold"),
            AlertKind::Predicted { .. } => write!(f, "predicted"),
        }
    }
}

/// A threshold rule violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub rule_id: String,
    /// The offending sample; projected for predicted alerts
    pub sample: Sample,
    pub severity: AlertSeverity,
    pub margin: f64,
    pub kind: AlertKind,
    pub raised_at: DateTime<Utc>,
}

/// Overall outcome of one polling round
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    Warning,
    Critical,
    /// No source produced a sample
    Failed,
}

impl HealthVerdict {
    /// Worst observed violation in the round
    ///
    /// Predicted alerts describe the future and leave the verdict untouched.
    pub fn of(snapshot: &Snapshot, alerts: &[Alert]) -> Self {
        if snapshot.is_failed() {
            return HealthVerdict::Failed;
        }
        alerts
            .iter()
            .filter(|a| a.kind == AlertKind::Threshold)
            .map(|a| match a.severity {
                AlertSeverity::Warning => HealthVerdict::Warning,
                AlertSeverity::Critical => HealthVerdict::Critical,
            })
            .max()
            .unwrap_or(HealthVerdict::Healthy)
    }
}

impl std::fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthVerdict::Healthy => write!(f, "healthy"),
            HealthVerdict::Warning => write!(f, "warning"),
            HealthVerdict::Critical => write!(f, "critical"),
            HealthVerdict::Failed => write!(f, "failed"),
        }
    }
}
