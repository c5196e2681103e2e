//! Observability infrastructure for the monitor
//!
//! Provides:
//! - Prometheus metrics (tick latency, overruns, alerts, source failures,
//!   round verdicts) and their text exposition
//! - Structured logging of monitor events with tracing

use chrono::{DateTime, Utc};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{Alert, AlertKind, AlertSeverity, HealthVerdict, Snapshot};

/// Histogram buckets for tick duration (in seconds)
const TICK_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    tick_duration_seconds: Histogram,
    ticks: IntCounter,
    tick_overruns: IntCounter,
    failed_rounds: IntCounter,
    alerts: IntCounterVec,
    source_failures: IntCounterVec,
    sample_value: GaugeVec,
    sources_configured: IntGauge,
    sink_panics: IntCounterVec,
    rounds: IntCounterVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "health_monitor_tick_duration_seconds",
                "Time spent sampling, evaluating and dispatching one tick",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            ticks: register_int_counter!(
                "health_monitor_ticks_total",
                "Total number of completed ticks"
            )
            .expect("Failed to register ticks_total"),

            tick_overruns: register_int_counter!(
                "health_monitor_tick_overruns_total",
                "Ticks skipped because the previous tick was still running"
            )
            .expect("Failed to register tick_overruns_total"),

            failed_rounds: register_int_counter!(
                "health_monitor_failed_rounds_total",
                "Polling rounds in which every source failed"
            )
            .expect("Failed to register failed_rounds_total"),

            alerts: register_int_counter_vec!(
                "health_monitor_alerts_total",
                "Alerts raised, by severity and kind",
                &["severity", "kind"]
            )
            .expect("Failed to register alerts_total"),

            source_failures: register_int_counter_vec!(
                "health_monitor_source_failures_total",
                "Polls that produced no sample, by source",
                &["source"]
            )
            .expect("Failed to register source_failures_total"),

            sample_value: register_gauge_vec!(
                "health_monitor_sample_value",
                "Most recent sampled value, by source",
                &["source"]
            )
            .expect("Failed to register sample_value"),

            sources_configured: register_int_gauge!(
                "health_monitor_sources_configured",
                "Number of metric sources in the active plan"
            )
            .expect("Failed to register sources_configured"),

            sink_panics: register_int_counter_vec!(
                "health_monitor_sink_panics_total",
                "Sink callbacks that panicked, by callback",
                &["callback"]
            )
            .expect("Failed to register sink_panics_total"),

            rounds: register_int_counter_vec!(
                "health_monitor_rounds_total",
                "Completed polling rounds, by overall verdict",
                &["verdict"]
            )
            .expect("Failed to register rounds_total"),
        }
    }
}

/// Handle to the process-global Prometheus metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Content type of [`MonitorMetrics::encode`] output
    pub const CONTENT_TYPE: &'static str = prometheus::TEXT_FORMAT;

    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_tick(&self, duration: Duration) {
        self.inner()
            .tick_duration_seconds
            .observe(duration.as_secs_f64());
        self.inner().ticks.inc();
    }

    pub fn inc_tick_overruns(&self) {
        self.inner().tick_overruns.inc();
    }

    pub fn inc_failed_rounds(&self) {
        self.inner().failed_rounds.inc();
    }

    pub fn record_snapshot(&self, snapshot: &Snapshot) {
        let inner = self.inner();
        for sample in &snapshot.samples {
            inner
                .sample_value
                .with_label_values(&[sample.source_name.as_str()])
                .set(sample.value);
        }
        for failure in &snapshot.failed {
            inner
                .source_failures
                .with_label_values(&[failure.source_name.as_str()])
                .inc();
        }
    }

    pub fn record_alert(&self, alert: &Alert) {
        self.inner()
            .alerts
            .with_label_values(&[
                alert.severity.to_string().as_str(),
                alert.kind.to_string().as_str(),
            ])
            .inc();
    }

    pub fn set_sources_configured(&self, count: usize) {
        self.inner().sources_configured.set(count as i64);
    }

    pub fn inc_sink_panics(&self, callback: &str) {
        self.inner()
            .sink_panics
            .with_label_values(&[callback])
            .inc();
    }

    pub fn record_verdict(&self, verdict: HealthVerdict) {
        self.inner()
            .rounds
            .with_label_values(&[verdict.to_string().as_str()])
            .inc();
    }

    /// Render the process registry in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for monitor events
///
/// Every event carries the `environment` field so log pipelines can split
/// presets running side by side.
#[derive(Clone)]
pub struct StructuredLogger {
    environment: String,
}

impl StructuredLogger {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn log_startup(
        &self,
        version: &str,
        interval: Duration,
        alert_threshold: f64,
        sources: &[&str],
        prediction_enabled: bool,
    ) {
        info!(
            event = "monitor_started",
            environment = %self.environment,
            version = %version,
            interval_ms = interval.as_millis() as u64,
            alert_threshold = alert_threshold,
            sources = ?sources,
            prediction_enabled = prediction_enabled,
            "Health monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            environment = %self.environment,
            reason = %reason,
            "Health monitor shutting down"
        );
    }

    pub fn log_snapshot(&self, snapshot: &Snapshot) {
        if snapshot.is_failed() {
            warn!(
                event = "round_failed",
                environment = %self.environment,
                taken_at = %snapshot.taken_at.to_rfc3339(),
                failed = ?snapshot.failed_names().collect::<Vec<_>>(),
                "No metric source produced a sample"
            );
            return;
        }

        for sample in &snapshot.samples {
            debug!(
                event = "sample",
                environment = %self.environment,
                source = %sample.source_name,
                value = sample.value,
                "Sampled metric"
            );
        }
        for failure in &snapshot.failed {
            warn!(
                event = "source_failed",
                environment = %self.environment,
                source = %failure.source_name,
                error = %failure.reason,
                "Metric source produced no sample"
            );
        }
        info!(
            event = "health_check",
            environment = %self.environment,
            taken_at = %snapshot.taken_at.to_rfc3339(),
            samples = snapshot.samples.len(),
            failed = snapshot.failed.len(),
            "Health check complete"
        );
    }

    pub fn log_alert(&self, alert: &Alert) {
        let confidence = match alert.kind {
            AlertKind::Predicted { confidence, .. } => Some(confidence),
            AlertKind::Threshold => None,
        };
        match alert.severity {
            AlertSeverity::Critical => warn!(
                event = "alert",
                environment = %self.environment,
                rule_id = %alert.rule_id,
                source = %alert.sample.source_name,
                value = alert.sample.value,
                margin = alert.margin,
                severity = %alert.severity,
                kind = %alert.kind,
                confidence = ?confidence,
                "Critical threshold violation"
            ),
            AlertSeverity::Warning => info!(
                event = "alert",
                environment = %self.environment,
                rule_id = %alert.rule_id,
                source = %alert.sample.source_name,
                value = alert.sample.value,
                margin = alert.margin,
                severity = %alert.severity,
                kind = %alert.kind,
                confidence = ?confidence,
                "Threshold violation"
            ),
        }
    }

    /// Overall verdict closing a health check
    pub fn log_round_status(&self, taken_at: DateTime<Utc>, verdict: HealthVerdict) {
        let taken_at = taken_at.to_rfc3339();
        match verdict {
            HealthVerdict::Healthy => info!(
                event = "system_status",
                environment = %self.environment,
                taken_at = %taken_at,
                status = %verdict,
                "System status: HEALTHY"
            ),
            HealthVerdict::Warning | HealthVerdict::Critical => warn!(
                event = "system_status",
                environment = %self.environment,
                taken_at = %taken_at,
                status = %verdict,
                "System status: WARNING - high resource usage"
            ),
            HealthVerdict::Failed => warn!(
                event = "system_status",
                environment = %self.environment,
                taken_at = %taken_at,
                status = %verdict,
                "System status: UNKNOWN - no metric source answered"
            ),
        }
    }

    pub fn log_tick_overrun(&self, at: DateTime<Utc>) {
        warn!(
            event = "tick_overrun",
            environment = %self.environment,
            at = %at.to_rfc3339(),
            "Previous tick still running, skipping"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sample;

    #[test]
    fn test_monitor_metrics_handles_share_registry() {
        let first = MonitorMetrics::new();
        let second = MonitorMetrics::new();

        first.observe_tick(Duration::from_millis(12));
        second.inc_tick_overruns();
        second.set_sources_configured(3);

        let now = Utc::now();
        first.record_alert(&Alert {
            rule_id: "cpu-high".to_string(),
            sample: Sample::new("cpu", 95.0, now),
            severity: AlertSeverity::Critical,
            margin: 15.0,
            kind: AlertKind::Threshold,
            raised_at: now,
        });

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "health_monitor_alerts_total"));
    }

    #[test]
    fn test_encode_renders_text_format() {
        let metrics = MonitorMetrics::new();
        metrics.record_verdict(HealthVerdict::Warning);
        metrics.inc_sink_panics("on_alert");

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("health_monitor_rounds_total{verdict=\"warning\"}"));
        assert!(text.contains("health_monitor_sink_panics_total{callback=\"on_alert\"}"));
        assert!(MonitorMetrics::CONTENT_TYPE.starts_with("text/plain"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("production");
        assert_eq!(logger.environment(), "production");
    }
}
