//! Health Monitor - periodic host health sampling with threshold alerts
//!
//! Samples CPU, memory and disk usage (plus load average and per-provider
//! cloud load in the experimental preset) on a fixed interval, raises alerts
//! when a reading crosses the configured threshold, and serves its own
//! health, status and metrics over HTTP.

use anyhow::{Context, Result};
use health_monitor::{api, config::AgentConfig};
use monitor_lib::{
    health::components,
    source::{cloud_sources, host_sources, FileLoadReader},
    HealthRegistry, MonitorMetrics, MonitorPlan, Scheduler, SchedulerConfig, StructuredLogger,
    TracingSink, TrendPredictor,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load()?;

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.preset().log_filter())),
        )
        .with(fmt::layer().json())
        .init();

    let settings = config.settings()?;
    info!(environment = %settings.preset, "Starting health-monitor");

    let mut sources =
        host_sources(&settings.sources).context("Failed to create metric sources")?;
    let reader = Arc::new(FileLoadReader::new(settings.cloud_load_dir.clone()));
    for source in cloud_sources(&settings.cloud_providers, reader) {
        sources.push(source).context("Failed to add cloud load source")?;
    }
    let rules = settings.rules().context("Failed to build alert rules")?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::SAMPLER).await;

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(settings.preset.as_str());

    let mut scheduler = Scheduler::new(
        MonitorPlan::new(sources, rules),
        Arc::new(TracingSink::new(logger.clone())),
        SchedulerConfig {
            poll_timeout: settings.poll_timeout,
        },
    )
    .with_health(health_registry.clone());
    if let Some(prediction) = settings.prediction.clone() {
        scheduler = scheduler.with_evaluator(Arc::new(TrendPredictor::new(prediction)));
    }
    let scheduler = Arc::new(scheduler);

    let plan = scheduler.plan();
    logger.log_startup(
        MONITOR_VERSION,
        settings.interval,
        settings.alert_threshold,
        &plan.sources().names(),
        settings.prediction.is_some(),
    );

    scheduler.start(settings.interval)?;

    // Start health, status and metrics server
    let api_port = config.api_port;
    let app_state = Arc::new(
        api::AppState::new(health_registry, metrics).with_scheduler(Arc::clone(&scheduler)),
    );
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    scheduler.stop().await;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
