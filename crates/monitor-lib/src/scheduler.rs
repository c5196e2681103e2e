//! Non-overlapping tick scheduler
//!
//! Drives the sample → evaluate → dispatch cycle on tokio's monotonic
//! clock. Each tick runs in a single slot: when the slot is still busy at
//! the next deadline that tick is skipped and reported as an overrun, so
//! ticks never queue up.
//!
//! State machine: `Idle -> Running -> Stopping -> Stopped`, and
//! `Stopped -> Running` on restart. The [`MonitorPlan`] is captured when the
//! loop starts and can only be swapped while idle or stopped.
//!
//! Sink callbacks are isolated: a panicking sink loses that one event and
//! the loop keeps ticking.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::MonitorError;
use crate::evaluator::{AlertEvaluator, Evaluator, RuleSet};
use crate::health::{components, HealthRegistry};
use crate::models::{HealthVerdict, Snapshot};
use crate::observability::MonitorMetrics;
use crate::sampler::{Sampler, DEFAULT_POLL_TIMEOUT};
use crate::sink::AlertSink;
use crate::source::SourceSet;

/// Sources and rules used by a running scheduler
#[derive(Debug, Clone, Default)]
pub struct MonitorPlan {
    sources: SourceSet,
    rules: RuleSet,
}

impl MonitorPlan {
    pub fn new(sources: SourceSet, rules: RuleSet) -> Self {
        Self { sources, rules }
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on one polling round (default: 5 seconds)
    pub poll_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    /// Cancelled, waiting for the in-flight tick to finish
    Stopping,
    Stopped,
}

/// Counters since the scheduler was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub overruns: u64,
    pub failed_rounds: u64,
    pub alerts: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    overruns: AtomicU64,
    failed_rounds: AtomicU64,
    alerts: AtomicU64,
}

/// Everything a tick needs, shared between the loop and tick tasks
struct TickContext {
    plan: Arc<MonitorPlan>,
    sampler: Sampler,
    evaluators: Vec<Arc<dyn Evaluator>>,
    sink: Arc<dyn AlertSink>,
    metrics: MonitorMetrics,
    health: Option<HealthRegistry>,
    counters: Arc<Counters>,
}

impl TickContext {
    async fn tick(&self) {
        let started = Instant::now();
        let plan = &self.plan;

        match self.sampler.collect(plan.sources()).await {
            Ok(snapshot) => {
                self.metrics.record_snapshot(&snapshot);
                self.report_round(&snapshot, plan.sources().len()).await;
                self.dispatch("on_snapshot", |sink| sink.on_snapshot(&snapshot));

                let alerts: Vec<_> = self
                    .evaluators
                    .iter()
                    .flat_map(|evaluator| evaluator.evaluate(&snapshot, plan.rules()))
                    .collect();
                for alert in &alerts {
                    self.metrics.record_alert(alert);
                    self.counters.alerts.fetch_add(1, Ordering::Relaxed);
                    self.dispatch("on_alert", |sink| sink.on_alert(alert));
                }

                let verdict = HealthVerdict::of(&snapshot, &alerts);
                self.metrics.record_verdict(verdict);
                self.dispatch("on_round_complete", |sink| {
                    sink.on_round_complete(snapshot.taken_at, verdict)
                });
            }
            Err(MonitorError::AllSourcesFailed { taken_at, failures }) => {
                // Surfaced as an empty snapshot; nothing to evaluate
                let snapshot = Snapshot::failed_round(taken_at, failures);
                self.metrics.record_snapshot(&snapshot);
                self.metrics.inc_failed_rounds();
                self.counters.failed_rounds.fetch_add(1, Ordering::Relaxed);
                self.report_round(&snapshot, plan.sources().len()).await;
                self.dispatch("on_snapshot", |sink| sink.on_snapshot(&snapshot));
                self.metrics.record_verdict(HealthVerdict::Failed);
                self.dispatch("on_round_complete", |sink| {
                    sink.on_round_complete(taken_at, HealthVerdict::Failed)
                });
            }
            Err(e) => warn!(error = %e, "Sampling round failed"),
        }

        let elapsed = started.elapsed();
        self.metrics.observe_tick(elapsed);
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        debug!(elapsed_ms = elapsed.as_millis() as u64, "Tick complete");
    }

    fn overrun(&self) {
        self.counters.overruns.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_tick_overruns();
        let at = Utc::now();
        self.dispatch("on_tick_overrun", |sink| sink.on_tick_overrun(at));
    }

    /// Hand one event to the sink, containing any panic
    fn dispatch(&self, callback: &'static str, deliver: impl FnOnce(&dyn AlertSink)) {
        let sink = self.sink.as_ref();
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| deliver(sink))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            self.metrics.inc_sink_panics(callback);
            error!(callback = callback, panic = %message, "Sink panicked; event dropped");
        }
    }

    async fn report_round(&self, snapshot: &Snapshot, total: usize) {
        let Some(health) = &self.health else {
            return;
        };

        if snapshot.is_failed() {
            health
                .set_unhealthy(components::SAMPLER, "All metric sources failed")
                .await;
        } else if !snapshot.failed.is_empty() {
            health
                .set_degraded(
                    components::SAMPLER,
                    format!("{} of {} sources failed", snapshot.failed.len(), total),
                )
                .await;
        } else {
            health.set_healthy(components::SAMPLER).await;
        }
    }
}

struct RunState {
    state: SchedulerState,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Periodic sampling and alerting loop
pub struct Scheduler {
    sampler: Sampler,
    evaluators: Vec<Arc<dyn Evaluator>>,
    sink: Arc<dyn AlertSink>,
    metrics: MonitorMetrics,
    health: Option<HealthRegistry>,
    counters: Arc<Counters>,
    plan: RwLock<Arc<MonitorPlan>>,
    run: Mutex<RunState>,
}

impl Scheduler {
    /// Create an idle scheduler with the threshold evaluator installed
    pub fn new(plan: MonitorPlan, sink: Arc<dyn AlertSink>, config: SchedulerConfig) -> Self {
        let metrics = MonitorMetrics::new();
        metrics.set_sources_configured(plan.sources().len());

        Self {
            sampler: Sampler::new(config.poll_timeout),
            evaluators: vec![Arc::new(AlertEvaluator::new())],
            sink,
            metrics,
            health: None,
            counters: Arc::new(Counters::default()),
            plan: RwLock::new(Arc::new(plan)),
            run: Mutex::new(RunState {
                state: SchedulerState::Idle,
                cancel: None,
                handle: None,
            }),
        }
    }

    /// Add an evaluator that runs after the threshold evaluator
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    /// Report sampler and scheduler health into `registry`
    pub fn with_health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        self.run_state().state
    }

    /// Counters accumulated across every run of this scheduler
    pub fn stats(&self) -> SchedulerStats {
        let c = &self.counters;
        SchedulerStats {
            ticks: c.ticks.load(Ordering::Relaxed),
            overruns: c.overruns.load(Ordering::Relaxed),
            failed_rounds: c.failed_rounds.load(Ordering::Relaxed),
            alerts: c.alerts.load(Ordering::Relaxed),
        }
    }

    /// The plan the next (or current) run uses
    pub fn plan(&self) -> Arc<MonitorPlan> {
        Arc::clone(&self.plan.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Swap sources and rules; only allowed while idle or stopped
    pub fn reconfigure(&self, plan: MonitorPlan) -> Result<(), MonitorError> {
        let run = self.run_state();
        check_not_active(run.state)?;

        self.metrics.set_sources_configured(plan.sources().len());
        *self.plan.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(plan);
        for evaluator in &self.evaluators {
            evaluator.reset();
        }
        info!("Monitor plan replaced");
        Ok(())
    }

    /// Begin ticking every `every`; the first tick fires immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, every: Duration) -> Result<(), MonitorError> {
        if every.is_zero() {
            return Err(MonitorError::InvalidInterval);
        }

        let mut run = self.run_state();
        check_not_active(run.state)?;

        let plan = self.plan();
        let cancel = CancellationToken::new();
        info!(
            interval_ms = every.as_millis() as u64,
            sources = plan.sources().len(),
            rules = plan.rules().len(),
            "Starting scheduler"
        );

        let ctx = Arc::new(TickContext {
            plan,
            sampler: self.sampler.clone(),
            evaluators: self.evaluators.clone(),
            sink: Arc::clone(&self.sink),
            metrics: self.metrics.clone(),
            health: self.health.clone(),
            counters: Arc::clone(&self.counters),
        });
        run.handle = Some(tokio::spawn(run_loop(ctx, every, cancel.clone())));
        run.cancel = Some(cancel);
        run.state = SchedulerState::Running;
        Ok(())
    }

    /// Stop ticking and wait for the in-flight tick, if any
    ///
    /// The state reads `Stopping` until the loop has drained, and `start`
    /// is refused until then. Calling this on a scheduler that is not
    /// running does nothing.
    pub async fn stop(&self) {
        let handle = {
            let mut run = self.run_state();
            if run.state != SchedulerState::Running {
                return;
            }
            run.state = SchedulerState::Stopping;
            if let Some(cancel) = run.cancel.take() {
                cancel.cancel();
            }
            run.handle.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop ended abnormally");
            }
        }

        self.run_state().state = SchedulerState::Stopped;
        info!("Scheduler stopped");
    }

    fn run_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn check_not_active(state: SchedulerState) -> Result<(), MonitorError> {
    match state {
        SchedulerState::Running => Err(MonitorError::Running),
        SchedulerState::Stopping => Err(MonitorError::Stopping),
        SchedulerState::Idle | SchedulerState::Stopped => Ok(()),
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(cancel) = self.run_state().cancel.take() {
            cancel.cancel();
        }
    }
}

async fn run_loop(ctx: Arc<TickContext>, every: Duration, cancel: CancellationToken) {
    if let Some(health) = &ctx.health {
        health.set_healthy(components::SCHEDULER).await;
        health.set_ready(true).await;
    }

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(handle) = in_flight.take() {
                    if !handle.is_finished() {
                        ctx.overrun();
                        in_flight = Some(handle);
                        continue;
                    }
                    reap(handle).await;
                }

                let tick_ctx = Arc::clone(&ctx);
                in_flight = Some(tokio::spawn(async move { tick_ctx.tick().await }));
            }
        }
    }

    // The in-flight tick is bounded by the poll timeout
    if let Some(handle) = in_flight {
        reap(handle).await;
    }

    if let Some(health) = &ctx.health {
        health.set_ready(false).await;
    }
}

async fn reap(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(error = %e, "Tick task failed");
    }
}
