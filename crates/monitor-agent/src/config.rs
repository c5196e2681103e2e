//! Monitor configuration
//!
//! Settings come from a named preset (`production`, `development`,
//! `experimental`) selected by `MONITOR_ENVIRONMENT`, falling back to
//! `NODE_ENV`. Individual `MONITOR_*` variables override preset values.
//!
//! Reading the preset has no side effects, so the log filter can be chosen
//! before tracing is installed; warnings about the configuration are only
//! emitted by [`AgentConfig::settings`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use monitor_lib::{MonitorError, RuleSet, ThresholdRule, TrendConfig};
use serde::Deserialize;
use tracing::warn;

/// Raw configuration as read from the environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    /// Preset name; unknown names fall back to production
    #[serde(default)]
    pub environment: Option<String>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Override for the preset tick interval, in seconds
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Override for the preset poll timeout, in milliseconds
    #[serde(default)]
    pub poll_timeout_ms: Option<u64>,

    /// Override for the preset alert threshold, in percent
    #[serde(default)]
    pub alert_threshold: Option<f64>,

    /// Directory holding `<provider>.load` files for cloud load sources
    #[serde(default)]
    pub cloud_load_dir: Option<String>,
}

fn default_api_port() -> u16 {
    8080
}

/// Where an external exporter drops per-provider load files
pub const DEFAULT_CLOUD_LOAD_DIR: &str = "/var/run/health-monitor/cloud";

impl AgentConfig {
    /// Load configuration from `MONITOR_*` environment variables
    pub fn load() -> Result<Self> {
        let source = config::Environment::with_prefix("MONITOR").try_parsing(true);
        let mut config = Self::from_env(source)?;
        if config.environment.is_none() {
            config.environment = std::env::var("NODE_ENV").ok();
        }
        Ok(config)
    }

    fn from_env(source: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
            .context("Invalid MONITOR_* configuration")
    }

    /// Selected preset; unknown or missing names mean production
    pub fn preset(&self) -> MonitorPreset {
        self.environment
            .as_deref()
            .and_then(MonitorPreset::parse)
            .unwrap_or(MonitorPreset::Production)
    }

    /// Resolve the preset and apply overrides
    pub fn settings(&self) -> Result<MonitorSettings> {
        if let Some(name) = self.environment.as_deref() {
            if MonitorPreset::parse(name).is_none() {
                warn!(environment = %name, "Unknown environment, using production preset");
            }
        }
        let mut settings = self.preset().settings();

        if let Some(secs) = self.interval_secs {
            if secs == 0 {
                bail!("MONITOR_INTERVAL_SECS must be greater than zero");
            }
            settings.interval = Duration::from_secs(secs);
        }
        if let Some(ms) = self.poll_timeout_ms {
            if ms == 0 {
                bail!("MONITOR_POLL_TIMEOUT_MS must be greater than zero");
            }
            settings.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(threshold) = self.alert_threshold {
            if !threshold.is_finite() {
                bail!("MONITOR_ALERT_THRESHOLD must be a finite number");
            }
            settings.alert_threshold = threshold;
        }
        if let Some(dir) = self.cloud_load_dir.as_deref() {
            settings.cloud_load_dir = PathBuf::from(dir);
        }

        if settings.poll_timeout > settings.interval {
            warn!(
                poll_timeout_ms = settings.poll_timeout.as_millis() as u64,
                interval_ms = settings.interval.as_millis() as u64,
                "Poll timeout exceeds tick interval; ticks will overrun"
            );
        }

        Ok(settings)
    }
}

/// Named monitoring profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPreset {
    Production,
    Development,
    Experimental,
}

impl MonitorPreset {
    /// Case-insensitive preset lookup
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "production" => Some(MonitorPreset::Production),
            "development" => Some(MonitorPreset::Development),
            "experimental" => Some(MonitorPreset::Experimental),
            _ => None,
        }
    }

    /// Default log filter, usable before settings are resolved
    pub fn log_filter(self) -> &'static str {
        match self {
            MonitorPreset::Development => "debug",
            MonitorPreset::Production | MonitorPreset::Experimental => "info",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorPreset::Production => "production",
            MonitorPreset::Development => "development",
            MonitorPreset::Experimental => "experimental",
        }
    }

    pub fn settings(self) -> MonitorSettings {
        let basic = vec!["cpu".to_string(), "memory".to_string(), "disk".to_string()];
        let cloud_load_dir = PathBuf::from(DEFAULT_CLOUD_LOAD_DIR);

        match self {
            MonitorPreset::Production => MonitorSettings {
                preset: self,
                interval: Duration::from_secs(60),
                poll_timeout: Duration::from_secs(5),
                alert_threshold: 80.0,
                sources: basic,
                cloud_providers: Vec::new(),
                cloud_load_dir,
                prediction: None,
            },
            MonitorPreset::Development => MonitorSettings {
                preset: self,
                interval: Duration::from_secs(5),
                poll_timeout: Duration::from_secs(2),
                alert_threshold: 90.0,
                sources: basic,
                cloud_providers: Vec::new(),
                cloud_load_dir,
                prediction: None,
            },
            MonitorPreset::Experimental => {
                let mut sources = basic;
                sources.push("load".to_string());

                MonitorSettings {
                    preset: self,
                    interval: Duration::from_secs(30),
                    poll_timeout: Duration::from_secs(5),
                    alert_threshold: 75.0,
                    sources,
                    cloud_providers: vec!["aws".to_string(), "azure".to_string(), "gcp".to_string()],
                    cloud_load_dir,
                    prediction: Some(TrendConfig {
                        horizon: Duration::from_secs(300),
                        ..TrendConfig::default()
                    }),
                }
            }
        }
    }
}

impl fmt::Display for MonitorPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective monitor settings after overrides
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub preset: MonitorPreset,
    pub interval: Duration,
    pub poll_timeout: Duration,
    /// Percent usage above which a resource alerts
    pub alert_threshold: f64,
    /// Host sources to sample
    pub sources: Vec<String>,
    /// Providers sampled as `cloud.<provider>.load`
    pub cloud_providers: Vec<String>,
    pub cloud_load_dir: PathBuf,
    pub prediction: Option<TrendConfig>,
}

/// Sources measured in percent, and therefore covered by the threshold
const PERCENT_SOURCES: &[&str] = &["cpu", "memory", "disk"];

/// Matches every cloud load source
const CLOUD_LOAD_PATTERN: &str = "cloud.*.load";

impl MonitorSettings {
    /// One `<source>-high` rule per enabled percentage source, plus one
    /// `cloud-load-high` rule covering all cloud providers
    pub fn rules(&self) -> Result<RuleSet, MonitorError> {
        let host = self
            .sources
            .iter()
            .filter(|name| PERCENT_SOURCES.contains(&name.as_str()))
            .map(|name| {
                ThresholdRule::above(format!("{}-high", name), name.as_str(), self.alert_threshold)
            });
        let cloud = (!self.cloud_providers.is_empty()).then(|| {
            ThresholdRule::above("cloud-load-high", CLOUD_LOAD_PATTERN, self.alert_threshold)
        });

        RuleSet::new(host.chain(cloud))
    }

    pub fn log_filter(&self) -> &'static str {
        self.preset.log_filter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_lib::Comparison;
    use std::io;
    use std::sync::{Arc, Mutex};

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("MONITOR")
            .try_parsing(true)
            .source(Some(map))
    }

    /// Collects formatted log output
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .finish();
            tracing::subscriber::with_default(subscriber, f)
        }

        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_defaults_to_production() {
        let config = AgentConfig::from_env(env(&[])).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.preset(), MonitorPreset::Production);

        let settings = config.settings().unwrap();
        assert_eq!(settings.interval, Duration::from_secs(60));
        assert_eq!(settings.alert_threshold, 80.0);
        assert!(settings.prediction.is_none());
        assert!(settings.cloud_providers.is_empty());
        assert_eq!(settings.log_filter(), "info");
    }

    #[test]
    fn test_preset_selection() {
        assert_eq!(MonitorPreset::parse("development"), Some(MonitorPreset::Development));
        assert_eq!(MonitorPreset::parse(" Experimental "), Some(MonitorPreset::Experimental));
        assert_eq!(MonitorPreset::parse("staging"), None);

        let dev = MonitorPreset::Development.settings();
        assert_eq!(dev.interval, Duration::from_secs(5));
        assert_eq!(dev.alert_threshold, 90.0);
        assert_eq!(dev.log_filter(), "debug");

        let exp = MonitorPreset::Experimental.settings();
        assert_eq!(exp.interval, Duration::from_secs(30));
        assert_eq!(exp.alert_threshold, 75.0);
        assert!(exp.sources.iter().any(|s| s == "load"));
        assert_eq!(exp.cloud_providers, vec!["aws", "azure", "gcp"]);
        assert_eq!(exp.cloud_load_dir, PathBuf::from(DEFAULT_CLOUD_LOAD_DIR));
        let prediction = exp.prediction.unwrap();
        assert_eq!(prediction.horizon, Duration::from_secs(300));
        assert_eq!(prediction.min_confidence, 0.5);
    }

    #[test]
    fn test_environment_overrides() {
        let config = AgentConfig::from_env(env(&[
            ("MONITOR_ENVIRONMENT", "experimental"),
            ("MONITOR_API_PORT", "9100"),
            ("MONITOR_INTERVAL_SECS", "10"),
            ("MONITOR_POLL_TIMEOUT_MS", "750"),
            ("MONITOR_ALERT_THRESHOLD", "65.5"),
            ("MONITOR_CLOUD_LOAD_DIR", "/tmp/cloud-load"),
        ]))
        .unwrap();
        assert_eq!(config.api_port, 9100);

        let settings = config.settings().unwrap();
        assert_eq!(settings.preset, MonitorPreset::Experimental);
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.poll_timeout, Duration::from_millis(750));
        assert_eq!(settings.alert_threshold, 65.5);
        assert_eq!(settings.cloud_load_dir, PathBuf::from("/tmp/cloud-load"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = AgentConfig {
            interval_secs: Some(0),
            ..AgentConfig::default()
        };
        assert!(config.settings().is_err());
    }

    #[test]
    fn test_unknown_environment_warns_once_settings_resolve() {
        let config = AgentConfig {
            environment: Some("staging".to_string()),
            ..AgentConfig::default()
        };
        let logs = LogBuffer::default();

        // Choosing the log filter happens before tracing exists and stays silent
        let preset = logs.capture(|| config.preset());
        assert_eq!(preset, MonitorPreset::Production);
        assert_eq!(preset.log_filter(), "info");
        assert!(logs.contents().is_empty());

        let settings = logs.capture(|| config.settings()).unwrap();
        assert_eq!(settings.preset, MonitorPreset::Production);
        let output = logs.contents();
        assert!(output.contains("Unknown environment, using production preset"));
        assert!(output.contains("staging"));
    }

    #[test]
    fn test_rules_cover_percentage_sources() {
        let settings = MonitorPreset::Experimental.settings();
        let rules = settings.rules().unwrap();

        let ids: Vec<_> = rules.rules().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["cpu-high", "memory-high", "disk-high", "cloud-load-high"]
        );
        assert!(rules
            .rules()
            .all(|r| r.limit == 75.0 && r.comparison == Comparison::Above));

        let cloud: Vec<_> = rules
            .matching("cloud.azure.load")
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(cloud, vec!["cloud-load-high"]);
        assert_eq!(rules.matching("load").count(), 0);
    }
}
