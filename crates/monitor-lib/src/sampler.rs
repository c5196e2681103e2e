//! Concurrent sampling rounds
//!
//! Every source in a [`SourceSet`] is polled on its own task. The round
//! waits at most `timeout` for the whole set; stragglers are aborted and
//! recorded as missing samples rather than failing the round.
//!
//! Round timestamps are wall-clock times advanced by tokio's monotonic
//! clock, so they never jump backwards when the system clock is adjusted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::error::{MonitorError, SourceError};
use crate::models::{Sample, Snapshot, SourceFailure};
use crate::source::SourceSet;

/// Default per-round poll timeout
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Wall-clock origin paired with a monotonic instant
#[derive(Debug, Clone, Copy)]
struct RoundClock {
    origin: Instant,
    origin_utc: DateTime<Utc>,
}

impl RoundClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_utc: Utc::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin_utc + elapsed
    }
}

/// Polls a set of sources with a bounded timeout
#[derive(Debug, Clone)]
pub struct Sampler {
    timeout: Duration,
    clock: RoundClock,
}

impl Sampler {
    /// Create a sampler that waits at most `timeout` per round
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clock: RoundClock::new(),
        }
    }

    /// Upper bound on one polling round
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one polling round
    ///
    /// Samples are ordered by source registration order. Fails with
    /// [`MonitorError::AllSourcesFailed`] only when no sample was obtained.
    pub async fn collect(&self, sources: &SourceSet) -> Result<Snapshot, MonitorError> {
        let taken_at = self.clock.now();
        let deadline = Instant::now() + self.timeout;

        let handles: Vec<_> = sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                tokio::spawn(async move { source.poll().await })
            })
            .collect();

        let mut samples = Vec::with_capacity(handles.len());
        let mut failed = Vec::new();

        for (source, mut handle) in sources.iter().zip(handles) {
            let name = source.name();

            let outcome = match timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => result.and_then(|sample| validate(name, sample)),
                Ok(Err(e)) if e.is_panic() => Err(SourceError::Panicked),
                Ok(Err(e)) => Err(SourceError::unavailable(e.to_string())),
                Err(_) => {
                    handle.abort();
                    Err(SourceError::Timeout(self.timeout))
                }
            };

            match outcome {
                Ok(sample) => samples.push(sample),
                Err(reason) => {
                    debug!(source = %name, error = %reason, "Source produced no sample");
                    failed.push(SourceFailure {
                        source_name: name.to_string(),
                        reason,
                    });
                }
            }
        }

        if samples.is_empty() {
            return Err(MonitorError::AllSourcesFailed {
                taken_at,
                failures: failed,
            });
        }

        Ok(Snapshot {
            taken_at,
            samples,
            failed,
        })
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_TIMEOUT)
    }
}

fn validate(name: &str, sample: Sample) -> Result<Sample, SourceError> {
    if sample.source_name != name {
        return Err(SourceError::NameMismatch(sample.source_name));
    }
    if !sample.value.is_finite() {
        return Err(SourceError::InvalidValue(sample.value));
    }
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fake::{
        FailingSource, FixedSource, MislabeledSource, SequenceSource, StalledSource,
    };
    use crate::source::MetricSource;

    fn set(sources: Vec<Arc<dyn MetricSource>>) -> SourceSet {
        SourceSet::from_sources(sources).unwrap()
    }

    #[tokio::test]
    async fn test_collect_orders_by_registration() {
        let sources = set(vec![
            Arc::new(FixedSource::new("disk", 30.0).with_delay(Duration::from_millis(20))),
            Arc::new(FixedSource::new("cpu", 10.0)),
            Arc::new(FixedSource::new("memory", 20.0).with_delay(Duration::from_millis(5))),
        ]);

        let snapshot = Sampler::new(Duration::from_secs(1))
            .collect(&sources)
            .await
            .unwrap();

        let names: Vec<_> = snapshot.samples.iter().map(|s| s.source_name.as_str()).collect();
        assert_eq!(names, vec!["disk", "cpu", "memory"]);
        assert!(snapshot.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_run_concurrently() {
        let sources = set(vec![
            Arc::new(FixedSource::new("a", 1.0).with_delay(Duration::from_millis(100))),
            Arc::new(FixedSource::new("b", 2.0).with_delay(Duration::from_millis(100))),
            Arc::new(FixedSource::new("c", 3.0).with_delay(Duration::from_millis(100))),
        ]);

        let start = Instant::now();
        let snapshot = Sampler::new(Duration::from_secs(1))
            .collect(&sources)
            .await
            .unwrap();

        assert_eq!(snapshot.samples.len(), 3);
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_source_times_out() {
        let timeout = Duration::from_millis(250);
        let sources = set(vec![
            Arc::new(FixedSource::new("cpu", 10.0)),
            Arc::new(StalledSource::new("cloud")),
        ]);

        let start = Instant::now();
        let snapshot = Sampler::new(timeout).collect(&sources).await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(50));
        assert_eq!(snapshot.samples.len(), 1);
        assert_eq!(snapshot.failed.len(), 1);
        assert_eq!(snapshot.failed[0].source_name, "cloud");
        assert_eq!(snapshot.failed[0].reason, SourceError::Timeout(timeout));
    }

    #[tokio::test]
    async fn test_partial_failure_is_recorded() {
        let sources = set(vec![
            Arc::new(FailingSource::new("disk", "mount missing")),
            Arc::new(FixedSource::new("cpu", 55.0)),
        ]);

        let snapshot = Sampler::default().collect(&sources).await.unwrap();

        assert_eq!(snapshot.samples.len(), 1);
        assert_eq!(snapshot.failed_names().collect::<Vec<_>>(), vec!["disk"]);
        assert!(matches!(
            snapshot.failed[0].reason,
            SourceError::Unavailable(ref r) if r == "mount missing"
        ));
    }

    #[tokio::test]
    async fn test_all_sources_failed() {
        let sources = set(vec![
            Arc::new(FailingSource::new("cpu", "down")),
            Arc::new(FailingSource::new("memory", "down")),
        ]);

        let result = Sampler::default().collect(&sources).await;

        match result {
            Err(MonitorError::AllSourcesFailed { failures, .. }) => {
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected AllSourcesFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_timestamps_follow_monotonic_clock() {
        let sources = set(vec![Arc::new(FixedSource::new("cpu", 10.0))]);
        let sampler = Sampler::default();

        let first = sampler.collect(&sources).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        let second = sampler.collect(&sources).await.unwrap();

        assert_eq!(
            second.taken_at - first.taken_at,
            chrono::Duration::seconds(30)
        );
    }

    #[tokio::test]
    async fn test_empty_set_fails_round() {
        let result = Sampler::default().collect(&SourceSet::new()).await;
        assert!(matches!(result, Err(MonitorError::AllSourcesFailed { .. })));
    }

    #[tokio::test]
    async fn test_invalid_samples_are_rejected() {
        let sources = set(vec![
            Arc::new(MislabeledSource::new("memory", "cpu")),
            Arc::new(SequenceSource::new("load", vec![f64::NAN])),
            Arc::new(FixedSource::new("disk", 12.0)),
        ]);

        let snapshot = Sampler::default().collect(&sources).await.unwrap();

        assert_eq!(snapshot.samples.len(), 1);
        assert_eq!(
            snapshot.failed[0].reason,
            SourceError::NameMismatch("cpu".to_string())
        );
        assert!(matches!(
            snapshot.failed[1].reason,
            SourceError::InvalidValue(v) if v.is_nan()
        ));
    }
}
