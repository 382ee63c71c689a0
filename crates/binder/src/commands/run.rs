//! Long-running bind loop

use anyhow::Result;
use sched_lib::{
    cache::IntervalTicker,
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    BindLoop,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::context::{tunables, GlobalOptions, SchedulerContext};

/// Poll for pending workloads and bind them until interrupted
pub async fn run(
    options: &GlobalOptions<'_>,
    poll_interval: Duration,
    no_preemption: bool,
) -> Result<()> {
    let mut tunables = tunables(options)?;
    if no_preemption {
        tunables.preemption_enabled = false;
    }
    info!(
        scheduler_name = %tunables.scheduler_name,
        alpha = tunables.alpha,
        preemption = tunables.preemption_enabled,
        scoring = tunables.scoring.as_str(),
        prometheus_url = %tunables.prometheus_url,
        "Bind loop configured"
    );

    let health = HealthRegistry::new();
    health.register(components::METRICS_SOURCE).await;
    health.register(components::NODE_CACHE).await;
    health.register(components::CLUSTER_API).await;

    let logger = StructuredLogger::new(tunables.scheduler_name.clone());
    logger.log_startup(env!("CARGO_PKG_VERSION"), "bind-loop");

    let ctx = SchedulerContext::build(options, tunables, Some(health.clone())).await?;
    let refresh = ctx
        .cache
        .start_refresh(Box::new(IntervalTicker::new(ctx.tunables.refresh_interval())));

    let service = Arc::new(ctx.service(ctx.tunables.preemption_enabled));
    let bind_loop = BindLoop::new(ctx.cluster.clone(), service)
        .with_poll_interval(poll_interval)
        .with_health(health.clone());

    health.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = tokio::spawn(async move { bind_loop.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health.set_ready(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = worker.await {
        error!(error = %e, "Bind loop task panicked");
    }
    refresh.close().await;
    info!("Shutting down");

    Ok(())
}
