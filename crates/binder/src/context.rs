//! Wiring shared by the subcommands

use crate::kube_cluster::{connect, KubeCluster};
use anyhow::{Context as _, Result};
use sched_lib::{
    cache::NodeStateCache,
    health::HealthRegistry,
    metrics::{NodeProbe, PrometheusClient},
    ClusterApi, ClusterNodeDirectory, FrontEnd, PreemptionEngine, SchedulerTunables,
    SchedulingService,
};
use std::sync::Arc;
use tracing::debug;

/// Connection-level settings taken from global flags
pub struct GlobalOptions<'a> {
    pub kubeconfig: Option<&'a str>,
    pub prometheus_url: Option<&'a str>,
}

pub struct SchedulerContext {
    pub tunables: SchedulerTunables,
    pub cluster: Arc<dyn ClusterApi>,
    pub cache: Arc<NodeStateCache>,
}

/// Bind-loop defaults, then environment, then flags
pub fn tunables(options: &GlobalOptions<'_>) -> Result<SchedulerTunables> {
    let mut tunables =
        SchedulerTunables::load(FrontEnd::BindLoop).context("invalid scheduler configuration")?;
    if let Some(url) = options.prometheus_url {
        tunables.prometheus_url = url.to_string();
    }
    Ok(tunables)
}

impl SchedulerContext {
    pub async fn build(
        options: &GlobalOptions<'_>,
        tunables: SchedulerTunables,
        health: Option<HealthRegistry>,
    ) -> Result<Self> {
        let client = connect(options.kubeconfig)
            .await
            .context("failed to create Kubernetes client")?;
        let cluster: Arc<dyn ClusterApi> =
            Arc::new(KubeCluster::new(client, tunables.scheduler_name.clone()));

        let source = Arc::new(
            PrometheusClient::new(&tunables.prometheus_url, tunables.metrics_timeout())
                .context("invalid Prometheus URL")?,
        );
        let probe = NodeProbe::new(source, tunables.probe_config());
        let directory = Arc::new(ClusterNodeDirectory::new(cluster.clone()));
        let mut cache = NodeStateCache::new(probe, directory);
        if let Some(health) = health {
            cache = cache.with_health(health);
        }
        debug!(prometheus_url = %tunables.prometheus_url, "Scheduler context ready");

        Ok(Self {
            tunables,
            cluster,
            cache: Arc::new(cache),
        })
    }

    /// Scheduling service, with eviction when `preempt` is set
    pub fn service(&self, preempt: bool) -> SchedulingService {
        let service = SchedulingService::new(self.cache.clone(), &self.tunables);
        if preempt {
            service.with_preemption(PreemptionEngine::new(self.cluster.clone()))
        } else {
            service
        }
    }

    /// Names of the schedulable nodes, or the single requested node
    pub async fn candidate_nodes(&self, only: Option<&str>) -> Result<Vec<String>> {
        if let Some(node) = only {
            return Ok(vec![node.to_string()]);
        }
        let nodes = self
            .cluster
            .list_nodes()
            .await
            .context("failed to list nodes")?;
        Ok(nodes
            .into_iter()
            .filter(|n| n.schedulable)
            .map(|n| n.name)
            .collect())
    }
}
