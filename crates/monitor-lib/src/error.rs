//! Error taxonomy for sampling and scheduling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::SourceFailure;

/// Per-source failure, recovered locally as a missing sample
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("sample reported for '{0}'")]
    NameMismatch(String),

    #[error("non-finite value {0}")]
    InvalidValue(f64),

    #[error("poll task panicked")]
    Panicked,
}

impl SourceError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        SourceError::Unavailable(reason.into())
    }
}

/// Round-level and configuration errors
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("all {} sources failed", failures.len())]
    AllSourcesFailed {
        taken_at: DateTime<Utc>,
        failures: Vec<SourceFailure>,
    },

    #[error("duplicate metric source '{0}'")]
    DuplicateSource(String),

    #[error("duplicate threshold rule '{0}'")]
    DuplicateRule(String),

    #[error("invalid threshold rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("tick interval must be non-zero")]
    InvalidInterval,

    #[error("scheduler is running; stop it before reconfiguring")]
    Running,

    #[error("scheduler is still draining its last tick")]
    Stopping,
}
