//! Per-provider cloud load sources
//!
//! Each configured provider gets a source named `cloud.<provider>.load`
//! reporting load in percent. Where the number comes from is behind
//! [`CloudLoadReader`]; no provider SDK is called from here. The bundled
//! [`FileLoadReader`] reads values dropped on disk by an external exporter.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;

use super::MetricSource;
use crate::error::SourceError;
use crate::models::Sample;

/// Source name for `provider`
pub fn cloud_source_name(provider: &str) -> String {
    format!("cloud.{}.load", provider)
}

/// Supplies the current load of one provider
#[async_trait]
pub trait CloudLoadReader: Send + Sync {
    async fn load(&self, provider: &str) -> Result<f64, SourceError>;
}

/// Reads `<dir>/<provider>.load`, a file holding a single number
#[derive(Debug, Clone)]
pub struct FileLoadReader {
    dir: PathBuf,
}

impl FileLoadReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn parse_load(content: &str) -> Result<f64, SourceError> {
        let trimmed = content.trim();
        trimmed
            .parse()
            .map_err(|_| SourceError::unavailable(format!("unparseable load value {:?}", trimmed)))
    }
}

#[async_trait]
impl CloudLoadReader for FileLoadReader {
    async fn load(&self, provider: &str) -> Result<f64, SourceError> {
        let file = self.dir.join(format!("{}.load", provider));
        let content = fs::read_to_string(&file).await.map_err(|e| {
            SourceError::unavailable(format!("failed to read {}: {}", file.display(), e))
        })?;
        Self::parse_load(&content)
    }
}

/// Load of one cloud provider
pub struct CloudLoadSource {
    provider: String,
    name: String,
    reader: Arc<dyn CloudLoadReader>,
}

impl CloudLoadSource {
    pub fn new(provider: impl Into<String>, reader: Arc<dyn CloudLoadReader>) -> Self {
        let provider = provider.into();
        Self {
            name: cloud_source_name(&provider),
            provider,
            reader,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

#[async_trait]
impl MetricSource for CloudLoadSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<Sample, SourceError> {
        let load = self.reader.load(&self.provider).await?;
        Ok(Sample::now(self.name.as_str(), load))
    }
}

/// One [`CloudLoadSource`] per provider, sharing `reader`
///
/// Blank and repeated provider names are skipped.
pub fn cloud_sources(
    providers: &[String],
    reader: Arc<dyn CloudLoadReader>,
) -> Vec<Arc<dyn MetricSource>> {
    let mut seen: Vec<&str> = Vec::new();
    let mut sources: Vec<Arc<dyn MetricSource>> = Vec::new();

    for provider in providers {
        let provider = provider.trim();
        if provider.is_empty() || seen.contains(&provider) {
            continue;
        }
        seen.push(provider);
        sources.push(Arc::new(CloudLoadSource::new(provider, Arc::clone(&reader))));
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct MapReader(HashMap<&'static str, f64>);

    #[async_trait]
    impl CloudLoadReader for MapReader {
        async fn load(&self, provider: &str) -> Result<f64, SourceError> {
            self.0
                .get(provider)
                .copied()
                .ok_or_else(|| SourceError::unavailable(format!("no data for {}", provider)))
        }
    }

    fn providers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_cloud_source_reports_provider_load() {
        let reader = Arc::new(MapReader(HashMap::from([("aws", 42.5), ("gcp", 91.0)])));
        let sources = cloud_sources(&providers(&["aws", "gcp", "azure"]), reader);

        let names: Vec<_> = sources.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["cloud.aws.load", "cloud.gcp.load", "cloud.azure.load"]);

        let sample = sources[1].poll().await.unwrap();
        assert_eq!(sample.source_name, "cloud.gcp.load");
        assert_eq!(sample.value, 91.0);

        assert!(matches!(
            sources[2].poll().await,
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_cloud_sources_skip_blank_and_repeated() {
        let reader = Arc::new(MapReader(HashMap::new()));
        let sources = cloud_sources(&providers(&["aws", " ", "aws", "azure"]), reader);

        let names: Vec<_> = sources.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["cloud.aws.load", "cloud.azure.load"]);
    }

    #[tokio::test]
    async fn test_file_reader_reads_load_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("aws.load"), "73.25\n")
            .await
            .unwrap();
        fs::write(temp_dir.path().join("azure.load"), "busy")
            .await
            .unwrap();

        let reader = FileLoadReader::new(temp_dir.path());
        assert_eq!(reader.load("aws").await.unwrap(), 73.25);
        assert!(matches!(
            reader.load("azure").await,
            Err(SourceError::Unavailable(_))
        ));
        assert!(matches!(
            reader.load("gcp").await,
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_parse_load() {
        assert_eq!(FileLoadReader::parse_load(" 12.5 \n").unwrap(), 12.5);
        assert!(FileLoadReader::parse_load("").is_err());
    }
}
