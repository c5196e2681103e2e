//! Output sinks for monitor events
//!
//! The scheduler hands every snapshot, alert, round verdict and tick overrun
//! to an [`AlertSink`]. Sinks must not block: the channel sink drops events
//! when its buffer is full instead of waiting for the consumer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;

use crate::models::{Alert, HealthVerdict, Snapshot};
use crate::observability::StructuredLogger;

/// Consumer of monitor output
///
/// Callbacks run on the scheduler's tick task. A callback that panics loses
/// that one event; the scheduler keeps ticking.
pub trait AlertSink: Send + Sync {
    /// Called once per round, before any alert of that round
    fn on_snapshot(&self, snapshot: &Snapshot);

    /// Called for each alert, in rule order
    fn on_alert(&self, alert: &Alert);

    /// Called when a tick fires while the previous one is still running
    fn on_tick_overrun(&self, at: DateTime<Utc>);

    /// Called last in every round with its overall verdict
    fn on_round_complete(&self, _taken_at: DateTime<Utc>, _verdict: HealthVerdict) {}
}

/// Event forwarded by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Snapshot(Snapshot),
    Alert(Alert),
    TickOverrun(DateTime<Utc>),
}

/// Presentation sink that renders events as structured log lines
#[derive(Clone)]
pub struct TracingSink {
    logger: StructuredLogger,
}

impl TracingSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

impl AlertSink for TracingSink {
    fn on_snapshot(&self, snapshot: &Snapshot) {
        self.logger.log_snapshot(snapshot);
    }

    fn on_alert(&self, alert: &Alert) {
        self.logger.log_alert(alert);
    }

    fn on_tick_overrun(&self, at: DateTime<Utc>) {
        self.logger.log_tick_overrun(at);
    }

    fn on_round_complete(&self, taken_at: DateTime<Utc>, verdict: HealthVerdict) {
        self.logger.log_round_status(taken_at, verdict);
    }
}

/// Forwards events over a bounded channel without waiting
pub struct ChannelSink {
    tx: mpsc::Sender<MonitorEvent>,
}

impl ChannelSink {
    /// Create the sink and the receiving half; a zero buffer is raised to one
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        (Self { tx }, rx)
    }

    fn forward(&self, event: MonitorEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!(error = %e, "Dropping monitor event");
        }
    }
}

impl AlertSink for ChannelSink {
    fn on_snapshot(&self, snapshot: &Snapshot) {
        self.forward(MonitorEvent::Snapshot(snapshot.clone()));
    }

    fn on_alert(&self, alert: &Alert) {
        self.forward(MonitorEvent::Alert(alert.clone()));
    }

    fn on_tick_overrun(&self, at: DateTime<Utc>) {
        self.forward(MonitorEvent::TickOverrun(at));
    }
}

/// Dispatches each event to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sink; events reach sinks in the order they were added
    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AlertSink for FanoutSink {
    fn on_snapshot(&self, snapshot: &Snapshot) {
        for sink in &self.sinks {
            sink.on_snapshot(snapshot);
        }
    }

    fn on_alert(&self, alert: &Alert) {
        for sink in &self.sinks {
            sink.on_alert(alert);
        }
    }

    fn on_tick_overrun(&self, at: DateTime<Utc>) {
        for sink in &self.sinks {
            sink.on_tick_overrun(at);
        }
    }

    fn on_round_complete(&self, taken_at: DateTime<Utc>, verdict: HealthVerdict) {
        for sink in &self.sinks {
            sink.on_round_complete(taken_at, verdict);
        }
    }
}
