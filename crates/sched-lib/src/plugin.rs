//! In-process placement plugin
//!
//! Framework-style extension points over [`SchedulingService`]: a
//! per-node filter, a per-node score and a normalization pass over all
//! scores of one cycle.

use crate::cache::NodeStateCache;
use crate::config::{FrontEnd, SchedulerTunables};
use crate::models::WorkloadSpec;
use crate::scheduler::SchedulingService;
use crate::scoring::normalize_scores;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Plugin name registered with the framework
pub const PLUGIN_NAME: &str = "MultiResource";

/// Result of a plugin call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    /// The node cannot take the workload
    Unschedulable(String),
    /// The plugin failed to reach a decision
    Error(String),
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "Success"),
            Status::Unschedulable(reason) => write!(f, "Unschedulable: {reason}"),
            Status::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// Score of one node within a scheduling cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    pub name: String,
    pub score: i64,
}

/// Filter and score extension points of a scheduling framework
#[async_trait]
pub trait PlacementPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn filter(&self, workload: &WorkloadSpec, node: &str) -> Status;

    async fn score(&self, workload: &WorkloadSpec, node: &str) -> (i64, Status);

    /// Rescale the scores of one cycle in place
    fn normalize_scores(&self, scores: &mut [NodeScore]) -> Status;
}

/// Multi-resource plugin backed by the shared scheduling core
pub struct MultiResourcePlugin {
    service: SchedulingService,
}

impl MultiResourcePlugin {
    pub fn new(cache: Arc<NodeStateCache>, tunables: &SchedulerTunables) -> Self {
        Self {
            service: SchedulingService::new(cache, tunables),
        }
    }

    /// Plugin with its default tunables
    pub fn with_defaults(cache: Arc<NodeStateCache>) -> Self {
        Self::new(cache, &SchedulerTunables::defaults_for(FrontEnd::Plugin))
    }

    pub fn service(&self) -> &SchedulingService {
        &self.service
    }
}

#[async_trait]
impl PlacementPlugin for MultiResourcePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn filter(&self, workload: &WorkloadSpec, node: &str) -> Status {
        let demand = self.service.demand_for(workload);
        let evaluation = self.service.evaluate_node(&demand, node).await;

        if evaluation.state.is_none() {
            return Status::Unschedulable(format!("Failed to get node {node} stats"));
        }
        if !evaluation.admitted() {
            let reason = format!(
                "Node {node} doesn't have enough resources for pod {}: {}",
                workload.qualified_name(),
                evaluation.reason.unwrap_or_default()
            );
            debug!(node = %node, reason = %reason, "Filtered out");
            return Status::Unschedulable(reason);
        }
        Status::Success
    }

    async fn score(&self, workload: &WorkloadSpec, node: &str) -> (i64, Status) {
        let demand = self.service.demand_for(workload);
        match self.service.score_node(&demand, node).await {
            Ok(score) => (score, Status::Success),
            Err(e) => {
                warn!(node = %node, error = %e, "Scoring without node state");
                (0, Status::Error(format!("Failed to get node {node} stats")))
            }
        }
    }

    fn normalize_scores(&self, scores: &mut [NodeScore]) -> Status {
        let mut values: Vec<i64> = scores.iter().map(|s| s.score).collect();
        normalize_scores(&mut values, self.service.scoring().max_score());
        for (entry, value) in scores.iter_mut().zip(values) {
            entry.score = value;
        }
        Status::Success
    }
}
