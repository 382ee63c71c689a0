//! Multi-resource scheduler extender
//!
//! Runs next to kube-scheduler and answers its filter and prioritize
//! calls using CPU, memory, disk and network state scraped from
//! Prometheus.

use anyhow::{Context, Result};
use multires_extender::{api, config::ExtenderConfig};
use sched_lib::{
    cache::{IntervalTicker, NodeStateCache},
    health::{components, HealthRegistry},
    metrics::{MetricsNodeDirectory, NodeProbe, PrometheusClient},
    observability::{SchedulerMetrics, StructuredLogger},
    SchedulingService,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXTENDER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ExtenderConfig::load()?;
    let tunables = &config.tunables;
    info!(
        port = config.port,
        alpha = tunables.alpha,
        max_score = tunables.max_score,
        scoring = tunables.scoring.as_str(),
        prometheus_url = %tunables.prometheus_url,
        "Extender configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRICS_SOURCE).await;
    health_registry.register(components::NODE_CACHE).await;

    let metrics = SchedulerMetrics::new();
    let logger = StructuredLogger::new(tunables.scheduler_name.clone());
    logger.log_startup(EXTENDER_VERSION, "extender");

    let source = Arc::new(
        PrometheusClient::new(&tunables.prometheus_url, tunables.metrics_timeout())
            .context("invalid Prometheus URL")?,
    );
    let probe = NodeProbe::new(source.clone(), tunables.probe_config());
    let directory = Arc::new(MetricsNodeDirectory::new(source));
    let cache = Arc::new(
        NodeStateCache::new(probe, directory).with_health(health_registry.clone()),
    );
    let refresh = cache.start_refresh(Box::new(IntervalTicker::new(tunables.refresh_interval())));

    let service = Arc::new(SchedulingService::new(Arc::clone(&cache), tunables));
    let app_state = Arc::new(api::AppState::new(
        service,
        health_registry.clone(),
        metrics.clone(),
    ));

    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = tokio::spawn(api::serve(config.port, app_state, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    refresh.close().await;
    match server.await {
        Ok(Err(e)) => error!(error = %e, "Extender server failed"),
        Err(e) => error!(error = %e, "Extender server task panicked"),
        Ok(Ok(())) => {}
    }
    info!("Shutting down");

    Ok(())
}
