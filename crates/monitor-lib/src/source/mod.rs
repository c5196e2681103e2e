//! Metric sources
//!
//! A [`MetricSource`] produces one named numeric [`Sample`] per poll. Host
//! sources are backed by `sysinfo`, cloud load sources by an injected
//! [`CloudLoadReader`]; the [`fake`] module holds deterministic sources for
//! tests and demos.

pub mod cloud;
pub mod fake;
mod system;

pub use cloud::{cloud_sources, CloudLoadReader, CloudLoadSource, FileLoadReader};
pub use system::{
    CpuUsageSource, DiskUsageSource, LoadAverageSource, MemoryUsageSource, HOST_SOURCE_NAMES,
};

use crate::error::{MonitorError, SourceError};
use crate::models::Sample;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Capability to produce a sample on demand
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Name of the metric, unique within a [`SourceSet`]
    fn name(&self) -> &str;

    /// Take one reading
    async fn poll(&self) -> Result<Sample, SourceError>;
}

/// Ordered, name-unique set of sources
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: Vec<Arc<dyn MetricSource>>,
}

impl SourceSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, rejecting duplicate names
    pub fn from_sources(
        sources: impl IntoIterator<Item = Arc<dyn MetricSource>>,
    ) -> Result<Self, MonitorError> {
        let mut set = Self::new();
        for source in sources {
            set.push(source)?;
        }
        Ok(set)
    }

    /// Append a source, rejecting a name already in the set
    pub fn push(&mut self, source: Arc<dyn MetricSource>) -> Result<(), MonitorError> {
        if self.contains(source.name()) {
            return Err(MonitorError::DuplicateSource(source.name().to_string()));
        }
        self.sources.push(source);
        Ok(())
    }

    /// Builder form of [`SourceSet::push`]
    pub fn with(mut self, source: Arc<dyn MetricSource>) -> Result<Self, MonitorError> {
        self.push(source)?;
        Ok(self)
    }

    /// Whether a source named `name` is in the set
    pub fn contains(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name() == name)
    }

    /// Source names in insertion order
    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Sources in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn MetricSource>> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Create the host sources named in `enabled`
///
/// Unknown names are skipped with a warning; repeated names are ignored.
pub fn host_sources(enabled: &[String]) -> Result<SourceSet, MonitorError> {
    let mut set = SourceSet::new();

    for name in enabled {
        if set.contains(name) {
            continue;
        }
        let source: Arc<dyn MetricSource> = match name.as_str() {
            system::CPU_SOURCE => Arc::new(CpuUsageSource::new()),
            system::MEMORY_SOURCE => Arc::new(MemoryUsageSource::new()),
            system::DISK_SOURCE => Arc::new(DiskUsageSource::new()),
            system::LOAD_SOURCE => Arc::new(LoadAverageSource::new()),
            other => {
                tracing::warn!(source = %other, "Unknown host metric source, skipping");
                continue;
            }
        };
        set.push(source)?;
    }

    Ok(set)
}
