//! Deterministic sources for tests and demos

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::MetricSource;
use crate::error::SourceError;
use crate::models::Sample;

/// Always returns the same value
pub struct FixedSource {
    name: String,
    value: f64,
    delay: Duration,
    polls: AtomicUsize,
}

impl FixedSource {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            delay: Duration::ZERO,
            polls: AtomicUsize::new(0),
        }
    }

    /// Sleep for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for FixedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Sample::now(&self.name, self.value))
    }
}

/// Steps through a list of values, repeating the last one
pub struct SequenceSource {
    name: String,
    values: Vec<f64>,
    cursor: AtomicUsize,
}

impl SequenceSource {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MetricSource for SequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let value = self
            .values
            .get(idx)
            .or_else(|| self.values.last())
            .copied()
            .ok_or_else(|| SourceError::unavailable("sequence is empty"))?;
        Ok(Sample::now(&self.name, value))
    }
}

/// Always fails with [`SourceError::Unavailable`]
pub struct FailingSource {
    name: String,
    reason: String,
}

impl FailingSource {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl MetricSource for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        Err(SourceError::unavailable(self.reason.clone()))
    }
}

/// Never answers
pub struct StalledSource {
    name: String,
}

impl StalledSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl MetricSource for StalledSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        std::future::pending().await
    }
}

/// Reports its samples under a different name than it is registered with
pub struct MislabeledSource {
    name: String,
    reported: String,
}

impl MislabeledSource {
    pub fn new(name: impl Into<String>, reported: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reported: reported.into(),
        }
    }
}

#[async_trait]
impl MetricSource for MislabeledSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        Ok(Sample::now(&self.reported, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last_value() {
        let source = SequenceSource::new("cpu", vec![10.0, 20.0]);

        assert_eq!(source.poll().await.unwrap().value, 10.0);
        assert_eq!(source.poll().await.unwrap().value, 20.0);
        assert_eq!(source.poll().await.unwrap().value, 20.0);
    }

    #[tokio::test]
    async fn test_empty_sequence_fails() {
        let source = SequenceSource::new("cpu", vec![]);
        assert!(matches!(source.poll().await, Err(SourceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_fixed_source_counts_polls() {
        let source = FixedSource::new("memory", 42.0);
        source.poll().await.unwrap();
        source.poll().await.unwrap();

        assert_eq!(source.poll_count(), 2);
    }
}
