//! Host metric sources backed by `sysinfo`
//!
//! Readings touch procfs/sysctl and may block, so each poll runs on the
//! blocking pool. All percentages are reported in the range 0-100.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Disks, System};
use tokio::task;

use super::MetricSource;
use crate::error::SourceError;
use crate::models::Sample;

pub(super) const CPU_SOURCE: &str = "cpu";
pub(super) const MEMORY_SOURCE: &str = "memory";
pub(super) const DISK_SOURCE: &str = "disk";
pub(super) const LOAD_SOURCE: &str = "load";

/// Names accepted by [`super::host_sources`]
pub const HOST_SOURCE_NAMES: &[&str] = &[CPU_SOURCE, MEMORY_SOURCE, DISK_SOURCE, LOAD_SOURCE];

/// Delay between the two refreshes needed for a first CPU reading
const CPU_WARMUP: Duration = Duration::from_millis(125);

async fn read_blocking<F>(name: &'static str, read: F) -> Result<Sample, SourceError>
where
    F: FnOnce() -> Result<f64, SourceError> + Send + 'static,
{
    let value = task::spawn_blocking(read)
        .await
        .map_err(|e| SourceError::unavailable(format!("{} reading failed: {}", name, e)))??;
    Ok(Sample::now(name, value))
}

/// Global CPU utilisation across all cores
pub struct CpuUsageSource {
    state: Arc<Mutex<CpuState>>,
}

struct CpuState {
    system: System,
    warmed_up: bool,
}

impl CpuUsageSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CpuState {
                system: System::new(),
                warmed_up: false,
            })),
        }
    }
}

impl Default for CpuUsageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for CpuUsageSource {
    fn name(&self) -> &str {
        CPU_SOURCE
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        let state = Arc::clone(&self.state);
        read_blocking(CPU_SOURCE, move || {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());

            // Usage is a delta between two refreshes
            if !state.warmed_up {
                state.system.refresh_cpu();
                std::thread::sleep(CPU_WARMUP);
                state.warmed_up = true;
            }
            state.system.refresh_cpu();

            if state.system.cpus().is_empty() {
                return Err(SourceError::unavailable("cpu list empty"));
            }
            Ok(state.system.global_cpu_info().cpu_usage() as f64)
        })
        .await
    }
}

/// Used memory as a percentage of total memory
pub struct MemoryUsageSource {
    system: Arc<Mutex<System>>,
}

impl MemoryUsageSource {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for MemoryUsageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for MemoryUsageSource {
    fn name(&self) -> &str {
        MEMORY_SOURCE
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        let system = Arc::clone(&self.system);
        read_blocking(MEMORY_SOURCE, move || {
            let mut system = system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_memory();
            percent(system.used_memory(), system.total_memory())
                .ok_or_else(|| SourceError::unavailable("total memory reported as zero"))
        })
        .await
    }
}

/// Used space across all mounted disks as a percentage of total space
#[derive(Default)]
pub struct DiskUsageSource;

impl DiskUsageSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricSource for DiskUsageSource {
    fn name(&self) -> &str {
        DISK_SOURCE
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        read_blocking(DISK_SOURCE, || {
            let disks = Disks::new_with_refreshed_list();
            if disks.list().is_empty() {
                return Err(SourceError::unavailable("no disks discovered"));
            }

            let (used, total) = disks.list().iter().fold((0u64, 0u64), |(used, total), d| {
                let size = d.total_space();
                (
                    used + size.saturating_sub(d.available_space()),
                    total + size,
                )
            });
            percent(used, total)
                .ok_or_else(|| SourceError::unavailable("disks report zero capacity"))
        })
        .await
    }
}

/// One-minute load average
#[derive(Default)]
pub struct LoadAverageSource;

impl LoadAverageSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricSource for LoadAverageSource {
    fn name(&self) -> &str {
        LOAD_SOURCE
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        read_blocking(LOAD_SOURCE, || Ok(System::load_average().one)).await
    }
}

fn percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(used as f64 / total as f64 * 100.0)
}
