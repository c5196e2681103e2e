//! Threshold alert evaluation
//!
//! Scores a [`Snapshot`] against an ordered [`RuleSet`]. Output order is
//! snapshot sample order, then rule definition order; repeated calls with
//! the same inputs yield the same alerts.

use regex::Regex;

use crate::error::MonitorError;
use crate::models::{Alert, AlertKind, Sample, Snapshot, ThresholdRule};

/// Glob over source names, compiled once
///
/// `*` matches any run of characters (including none), `?` matches exactly
/// one character, everything else is literal.
#[derive(Debug, Clone)]
pub struct NamePattern {
    glob: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(glob.len() + 8);
        expr.push('^');
        let mut literal = String::new();
        for ch in glob.chars() {
            match ch {
                '*' | '?' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    expr.push_str(if ch == '*' { ".*" } else { "." });
                }
                _ => literal.push(ch),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        Ok(Self {
            glob: glob.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: ThresholdRule,
    pattern: NamePattern,
}

/// Validated threshold rules in definition order
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new(rules: impl IntoIterator<Item = ThresholdRule>) -> Result<Self, MonitorError> {
        let mut compiled: Vec<CompiledRule> = Vec::new();

        for rule in rules {
            let invalid = |reason: &str| MonitorError::InvalidRule {
                id: rule.id.clone(),
                reason: reason.to_string(),
            };

            if rule.id.is_empty() {
                return Err(invalid("rule id is empty"));
            }
            if compiled.iter().any(|c| c.rule.id == rule.id) {
                return Err(MonitorError::DuplicateRule(rule.id.clone()));
            }
            if rule.pattern.is_empty() {
                return Err(invalid("pattern is empty"));
            }
            if !rule.limit.is_finite() {
                return Err(invalid("limit must be finite"));
            }
            if let Some(margin) = rule.critical_margin {
                if !margin.is_finite() || margin < 0.0 {
                    return Err(invalid("critical margin must be a non-negative number"));
                }
            }

            let pattern = NamePattern::new(&rule.pattern).map_err(|e| invalid(&e.to_string()))?;
            compiled.push(CompiledRule { rule, pattern });
        }

        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &ThresholdRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// Rules whose pattern matches `source_name`, in definition order
    pub fn matching<'a>(&'a self, source_name: &'a str) -> impl Iterator<Item = &'a ThresholdRule> {
        self.rules
            .iter()
            .filter(move |c| c.pattern.matches(source_name))
            .map(|c| &c.rule)
    }

    /// Build an alert if `sample` breaks `rule`
    pub(crate) fn check(
        rule: &ThresholdRule,
        sample: &Sample,
        kind: AlertKind,
        raised_at: chrono::DateTime<chrono::Utc>,
    ) -> Option<Alert> {
        let margin = rule.margin(sample.value)?;
        Some(Alert {
            rule_id: rule.id.clone(),
            sample: sample.clone(),
            severity: rule.severity_for(margin),
            margin,
            kind,
            raised_at,
        })
    }
}

/// Pluggable snapshot scorer
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, snapshot: &Snapshot, rules: &RuleSet) -> Vec<Alert>;

    /// Forget any state carried between snapshots
    fn reset(&self) {}
}

/// Stateless threshold evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertEvaluator;

impl AlertEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for AlertEvaluator {
    fn evaluate(&self, snapshot: &Snapshot, rules: &RuleSet) -> Vec<Alert> {
        snapshot
            .samples
            .iter()
            .flat_map(|sample| {
                rules.matching(&sample.source_name).filter_map(move |rule| {
                    RuleSet::check(rule, sample, AlertKind::Threshold, snapshot.taken_at)
                })
            })
            .collect()
    }
}
