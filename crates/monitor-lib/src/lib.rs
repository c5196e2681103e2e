//! Monitoring library for periodic host health sampling
//!
//! This crate provides the core functionality for:
//! - Pluggable metric sources (host CPU, memory, disk, load, cloud load)
//! - Concurrent sampling rounds with a bounded timeout
//! - Threshold alert evaluation and trend prediction
//! - A non-overlapping tick scheduler dispatching to sinks
//! - Health checks and observability

pub mod error;
pub mod evaluator;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod sampler;
pub mod scheduler;
pub mod sink;
pub mod source;

pub use error::{MonitorError, SourceError};
pub use evaluator::{AlertEvaluator, Evaluator, NamePattern, RuleSet};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use predictor::{TrendConfig, TrendFit, TrendPredictor};
pub use sampler::Sampler;
pub use scheduler::{MonitorPlan, Scheduler, SchedulerConfig, SchedulerState, SchedulerStats};
pub use sink::{AlertSink, ChannelSink, FanoutSink, MonitorEvent, TracingSink};
pub use source::{MetricSource, SourceSet};
