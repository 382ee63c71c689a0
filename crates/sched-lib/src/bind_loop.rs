//! Watch-and-bind loop
//!
//! Polls the cluster for pending workloads addressed to this scheduler,
//! places each one and binds it. A failure on one workload never stops
//! the pass.

use crate::cluster::{ClusterApi, ClusterError};
use crate::health::{components, HealthRegistry};
use crate::observability::SchedulerMetrics;
use crate::scheduler::SchedulingService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default delay between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Delay after the cluster could not be listed
pub const LIST_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Counts of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindSummary {
    pub pending: usize,
    pub bound: usize,
    pub unschedulable: usize,
    pub bind_failures: usize,
}

pub struct BindLoop {
    cluster: Arc<dyn ClusterApi>,
    service: Arc<SchedulingService>,
    poll_interval: Duration,
    health: Option<HealthRegistry>,
    metrics: SchedulerMetrics,
}

impl BindLoop {
    pub fn new(cluster: Arc<dyn ClusterApi>, service: Arc<SchedulingService>) -> Self {
        Self {
            cluster,
            service,
            poll_interval: DEFAULT_POLL_INTERVAL,
            health: None,
            metrics: SchedulerMetrics::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Schedulable node names, in listing order
    async fn candidate_nodes(&self) -> Result<Vec<String>, ClusterError> {
        let nodes = self.cluster.list_nodes().await?;
        Ok(nodes
            .into_iter()
            .filter(|n| {
                if !n.schedulable {
                    debug!(node = %n.name, "Node not ready or cordoned, skipping");
                }
                n.schedulable
            })
            .map(|n| n.name)
            .collect())
    }

    /// Place and bind every pending workload once
    pub async fn run_once(&self) -> Result<BindSummary, ClusterError> {
        let pending = self.cluster.list_pending_workloads().await?;
        let mut summary = BindSummary {
            pending: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(summary);
        }

        let nodes = self.candidate_nodes().await?;
        for workload in pending {
            let name = workload.qualified_name();
            let placement = match self.service.place(&workload, &nodes).await {
                Ok(placement) => placement,
                Err(e) => {
                    warn!(workload = %name, error = %e, "No node found for workload");
                    summary.unschedulable += 1;
                    continue;
                }
            };

            match self.cluster.bind(&workload, &placement.node).await {
                Ok(()) => {
                    info!(
                        workload = %name,
                        node = %placement.node,
                        score = placement.score,
                        evicted = placement.evicted.len(),
                        "Workload bound"
                    );
                    self.metrics.inc_bind(true);
                    summary.bound += 1;
                }
                Err(e) => {
                    warn!(workload = %name, node = %placement.node, error = %e, "Bind failed");
                    self.metrics.inc_bind(false);
                    summary.bind_failures += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Poll until `shutdown` fires
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_ms = self.poll_interval.as_millis() as u64, "Bind loop started");
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Bind loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    delay = match self.run_once().await {
                        Ok(summary) => {
                            if summary.pending > 0 {
                                debug!(?summary, "Bind pass complete");
                            }
                            self.report_cluster(None).await;
                            self.poll_interval
                        }
                        Err(e) => {
                            warn!(error = %e, "Listing the cluster failed, backing off");
                            self.report_cluster(Some(e.to_string())).await;
                            LIST_ERROR_BACKOFF
                        }
                    };
                }
            }
        }
    }

    async fn report_cluster(&self, error: Option<String>) {
        let Some(health) = &self.health else {
            return;
        };
        match error {
            None => health.set_healthy(components::CLUSTER_API).await,
            Some(e) => health.set_degraded(components::CLUSTER_API, e).await,
        }
    }
}
