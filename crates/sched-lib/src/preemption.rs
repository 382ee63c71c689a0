//! Priority-based preemption
//!
//! Victims are chosen first and evicted only once the chosen set is
//! proven sufficient. Eviction is idempotent and resumable: a partial
//! failure returns the remaining plan so the caller can retry it.

use crate::admission::projected_utilization;
use crate::cluster::{ClusterApi, ClusterError};
use crate::models::{DemandVector, Dimension, NodeResourceState, RunningWorkload};
use crate::observability::{SchedulerMetrics, StructuredLogger, DEFAULT_SCHEDULER_NAME};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Dimensions running workloads report requests for by default
pub const DEFAULT_TRACKED: [Dimension; 2] = [Dimension::Cpu, Dimension::Memory];

/// Workloads to evict from one node, in eviction order
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionPlan {
    pub node: String,
    pub preemptor_priority: i32,
    pub victims: Vec<RunningWorkload>,
}

/// Result of victim selection
#[derive(Debug, Clone, PartialEq)]
pub enum VictimSelection {
    /// No running workload has a lower priority than the request
    NoCandidates,
    /// Evicting every candidate would still not make room
    Insufficient { candidates: usize },
    Sufficient(Vec<RunningWorkload>),
}

/// Result of a completed preemption attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PreemptionOutcome {
    NoCandidates,
    Insufficient { candidates: usize },
    /// All victims were evicted, in this order
    Evicted(Vec<RunningWorkload>),
}

impl PreemptionOutcome {
    pub fn evicted(&self) -> bool {
        matches!(self, PreemptionOutcome::Evicted(_))
    }
}

/// Errors raised while preempting
#[derive(Debug, Error)]
pub enum PreemptionError {
    #[error("failed to list workloads on node {node}: {source}")]
    ListFailed {
        node: String,
        #[source]
        source: ClusterError,
    },

    #[error("eviction of {failed} failed after evicting {} workloads: {source}", .evicted.len())]
    PartialEviction {
        evicted: Vec<String>,
        failed: String,
        /// Victims not yet evicted, starting with the failed one
        remaining: EvictionPlan,
        #[source]
        source: ClusterError,
    },
}

/// Choose victims among `running` for `demand` on a node in `state`.
///
/// Candidates with a lower priority than the request are taken lowest
/// priority first until `free + reclaimed >= demand` holds on every
/// tracked dimension. With a `ceiling`, the projected utilization after
/// reclaiming must also stay at or below it. At least one victim is
/// always selected.
pub fn select_victims(
    demand: &DemandVector,
    state: &NodeResourceState,
    running: &[RunningWorkload],
    tracked: &[Dimension],
    ceiling: Option<f64>,
) -> VictimSelection {
    let mut candidates: Vec<&RunningWorkload> = running
        .iter()
        .filter(|w| w.priority < demand.priority)
        .collect();
    if candidates.is_empty() {
        return VictimSelection::NoCandidates;
    }
    // stable: equal priorities keep listing order
    candidates.sort_by_key(|w| w.priority);

    let mut reclaimed = [0.0f64; 6];
    let mut victims = Vec::new();
    for candidate in &candidates {
        for (slot, dim) in Dimension::ALL.iter().enumerate() {
            reclaimed[slot] += candidate.request(*dim).max(0.0);
        }
        victims.push((*candidate).clone());

        let sufficient = tracked.iter().all(|dim| {
            let slot = Dimension::ALL.iter().position(|d| d == dim).unwrap_or(0);
            let requested = demand.get(*dim);
            let free = state.free(*dim) + reclaimed[slot];
            if free < requested {
                return false;
            }
            match ceiling {
                Some(ceiling) if requested > 0.0 => {
                    projected_utilization(requested, free, state.total(*dim)) <= ceiling
                }
                _ => true,
            }
        });
        if sufficient {
            return VictimSelection::Sufficient(victims);
        }
    }

    VictimSelection::Insufficient {
        candidates: candidates.len(),
    }
}

/// Evicts lower-priority workloads to make room for a request
#[derive(Clone)]
pub struct PreemptionEngine {
    cluster: Arc<dyn ClusterApi>,
    tracked: Vec<Dimension>,
    ceiling: Option<f64>,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
}

impl PreemptionEngine {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            tracked: DEFAULT_TRACKED.to_vec(),
            ceiling: None,
            metrics: SchedulerMetrics::new(),
            logger: StructuredLogger::new(DEFAULT_SCHEDULER_NAME),
        }
    }

    /// Utilization ceiling victims must bring every tracked dimension under
    pub fn with_ceiling(mut self, ceiling: Option<f64>) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Name reported in eviction events
    pub fn with_scheduler_name(mut self, name: impl Into<String>) -> Self {
        self.logger = StructuredLogger::new(name);
        self
    }

    /// Track additional dimensions when checking sufficiency
    pub fn with_tracked(mut self, tracked: Vec<Dimension>) -> Self {
        self.tracked = tracked;
        self
    }

    pub fn tracked(&self) -> &[Dimension] {
        &self.tracked
    }

    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    pub fn scheduler_name(&self) -> &str {
        self.logger.scheduler_name()
    }

    /// Try to make room for `demand` on `node`.
    ///
    /// Nothing is evicted unless the selected victims are sufficient.
    /// The cache is not updated; callers must refresh the node and re-run
    /// admission before placing.
    pub async fn try_preempt(
        &self,
        demand: &DemandVector,
        node: &str,
        state: &NodeResourceState,
    ) -> Result<PreemptionOutcome, PreemptionError> {
        let running = self
            .cluster
            .list_running_workloads(node)
            .await
            .map_err(|source| {
                self.metrics.inc_preemption("failed");
                PreemptionError::ListFailed {
                    node: node.to_string(),
                    source,
                }
            })?;

        match select_victims(demand, state, &running, &self.tracked, self.ceiling) {
            VictimSelection::NoCandidates => {
                debug!(node = %node, priority = demand.priority, "No lower-priority workloads to preempt");
                self.metrics.inc_preemption("no_candidates");
                Ok(PreemptionOutcome::NoCandidates)
            }
            VictimSelection::Insufficient { candidates } => {
                debug!(
                    node = %node,
                    candidates = candidates,
                    "Evicting every candidate would not free enough resources"
                );
                self.metrics.inc_preemption("insufficient");
                Ok(PreemptionOutcome::Insufficient { candidates })
            }
            VictimSelection::Sufficient(victims) => {
                info!(node = %node, victims = victims.len(), "Preempting workloads");
                let plan = EvictionPlan {
                    node: node.to_string(),
                    preemptor_priority: demand.priority,
                    victims,
                };
                let evicted = self.execute(plan).await?;
                Ok(PreemptionOutcome::Evicted(evicted))
            }
        }
    }

    /// Evict every victim of `plan` in order.
    ///
    /// A victim that is already gone counts as evicted, so a plan
    /// returned in [`PreemptionError::PartialEviction`] can be retried.
    pub async fn execute(&self, plan: EvictionPlan) -> Result<Vec<RunningWorkload>, PreemptionError> {
        let mut evicted = Vec::with_capacity(plan.victims.len());

        for (idx, victim) in plan.victims.iter().enumerate() {
            match self.cluster.evict(victim).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(victim = %victim.qualified_name(), "Victim already gone");
                }
                Err(source) => {
                    let evicted_ids: Vec<String> = evicted
                        .iter()
                        .map(|w: &RunningWorkload| w.qualified_name())
                        .collect();
                    self.metrics.inc_evictions(evicted.len());
                    self.metrics.inc_preemption("partial");
                    self.logger.log_partial_eviction(
                        &plan.node,
                        evicted.len(),
                        &victim.qualified_name(),
                        &source.to_string(),
                    );
                    warn!(node = %plan.node, victim = %victim.qualified_name(), error = %source, "Eviction failed");
                    return Err(PreemptionError::PartialEviction {
                        evicted: evicted_ids,
                        failed: victim.qualified_name(),
                        remaining: EvictionPlan {
                            node: plan.node.clone(),
                            preemptor_priority: plan.preemptor_priority,
                            victims: plan.victims[idx..].to_vec(),
                        },
                        source,
                    });
                }
            }
            self.logger.log_eviction(
                &plan.node,
                &victim.qualified_name(),
                victim.priority,
                plan.preemptor_priority,
            );
            evicted.push(victim.clone());
        }

        self.metrics.inc_evictions(evicted.len());
        self.metrics.inc_preemption("evicted");
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    fn workload(id: &str, cpu: f64, mem: f64, priority: i32) -> RunningWorkload {
        RunningWorkload {
            id: id.to_string(),
            namespace: "default".to_string(),
            cpu_request: cpu,
            mem_request: mem,
            disk_read_request: 0.0,
            disk_write_request: 0.0,
            net_up_request: 0.0,
            net_down_request: 0.0,
            priority,
        }
    }

    fn tight_node() -> NodeResourceState {
        NodeResourceState {
            cpu_total: 2.0,
            cpu_free: 0.5,
            mem_total: 2.0 * GIB,
            mem_free: 512.0 * MIB,
            ..Default::default()
        }
    }

    fn demand() -> DemandVector {
        DemandVector {
            cpu: 1.0,
            mem: 1.0 * GIB,
            priority: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_preempts_both_low_priority_workloads() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_running("node-a", workload("batch-1", 0.5, 500.0 * MIB, 1));
        cluster.add_running("node-a", workload("batch-2", 0.5, 500.0 * MIB, 1));

        let engine = PreemptionEngine::new(cluster.clone());
        let outcome = engine
            .try_preempt(&demand(), "node-a", &tight_node())
            .await
            .unwrap();

        assert!(outcome.evicted());
        assert_eq!(cluster.evicted(), vec!["batch-1".to_string(), "batch-2".to_string()]);
    }

    #[tokio::test]
    async fn test_no_candidates_evicts_nothing() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_running("node-a", workload("critical", 0.5, 500.0 * MIB, 100));

        let engine = PreemptionEngine::new(cluster.clone());
        let outcome = engine
            .try_preempt(&demand(), "node-a", &tight_node())
            .await
            .unwrap();

        assert_eq!(outcome, PreemptionOutcome::NoCandidates);
        assert!(cluster.evicted().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_candidates_evict_nothing() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_running("node-a", workload("tiny", 0.1, 10.0 * MIB, 1));

        let engine = PreemptionEngine::new(cluster.clone());
        let outcome = engine
            .try_preempt(&demand(), "node-a", &tight_node())
            .await
            .unwrap();

        assert_eq!(outcome, PreemptionOutcome::Insufficient { candidates: 1 });
        assert!(cluster.evicted().is_empty());
    }

    #[test]
    fn test_victims_lowest_priority_first() {
        let running = vec![
            workload("mid", 1.0, 1.0 * GIB, 5),
            workload("low", 1.0, 1.0 * GIB, 1),
            workload("equal", 4.0, 4.0 * GIB, 10),
        ];

        let selection = select_victims(&demand(), &tight_node(), &running, &DEFAULT_TRACKED, None);

        match selection {
            VictimSelection::Sufficient(victims) => {
                let ids: Vec<&str> = victims.iter().map(|v| v.id.as_str()).collect();
                assert_eq!(ids, vec!["low"]);
            }
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn test_tracking_extra_dimension_needs_more_victims() {
        let mut first = workload("first", 1.0, 1.0 * GIB, 1);
        first.disk_read_request = 10.0;
        let mut second = workload("second", 0.0, 0.0, 2);
        second.disk_read_request = 100.0;
        let running = vec![first, second];

        let mut want = demand();
        want.disk_read = 50.0;

        let cpu_mem = select_victims(&want, &tight_node(), &running, &DEFAULT_TRACKED, None);
        assert!(matches!(cpu_mem, VictimSelection::Sufficient(ref v) if v.len() == 1));

        let with_disk = select_victims(
            &want,
            &tight_node(),
            &running,
            &[Dimension::Cpu, Dimension::Memory, Dimension::DiskRead],
            None,
        );
        assert!(matches!(with_disk, VictimSelection::Sufficient(ref v) if v.len() == 2));
    }

    #[test]
    fn test_ceiling_needs_victims_beyond_capacity() {
        let running = vec![
            workload("low", 0.5, 512.0 * MIB, 1),
            workload("next", 1.0, 1.0 * GIB, 2),
        ];

        // capacity alone: evicting "low" leaves exactly the demand free
        let capacity = select_victims(&demand(), &tight_node(), &running, &DEFAULT_TRACKED, None);
        assert!(matches!(capacity, VictimSelection::Sufficient(ref v) if v.len() == 1));

        // cpu after "low" only: 1 - (1 - 1) / 2 = 1.0; after both: 0.5
        let ceiling = select_victims(&demand(), &tight_node(), &running, &DEFAULT_TRACKED, Some(0.8));
        assert!(matches!(ceiling, VictimSelection::Sufficient(ref v) if v.len() == 2));

        let unreachable =
            select_victims(&demand(), &tight_node(), &running, &DEFAULT_TRACKED, Some(0.4));
        assert_eq!(unreachable, VictimSelection::Insufficient { candidates: 2 });
    }

    #[tokio::test]
    async fn test_unreachable_ceiling_evicts_nothing() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_running("node-a", workload("low", 0.5, 512.0 * MIB, 1));
        cluster.add_running("node-a", workload("next", 1.0, 1.0 * GIB, 2));

        let engine = PreemptionEngine::new(cluster.clone()).with_ceiling(Some(0.4));
        let outcome = engine
            .try_preempt(&demand(), "node-a", &tight_node())
            .await
            .unwrap();

        assert_eq!(outcome, PreemptionOutcome::Insufficient { candidates: 2 });
        assert!(cluster.evicted().is_empty());
    }

    #[tokio::test]
    async fn test_partial_eviction_is_resumable() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_running("node-a", workload("batch-1", 0.5, 500.0 * MIB, 1));
        cluster.add_running("node-a", workload("batch-2", 0.5, 500.0 * MIB, 2));
        cluster.fail_eviction_of("batch-2");

        let engine = PreemptionEngine::new(cluster.clone());
        let err = engine
            .try_preempt(&demand(), "node-a", &tight_node())
            .await
            .unwrap_err();

        let remaining = match err {
            PreemptionError::PartialEviction {
                evicted,
                failed,
                remaining,
                ..
            } => {
                assert_eq!(evicted, vec!["default/batch-1".to_string()]);
                assert_eq!(failed, "default/batch-2");
                remaining
            }
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(remaining.victims.len(), 1);
        assert_eq!(cluster.evicted(), vec!["batch-1".to_string()]);

        cluster.allow_eviction_of("batch-2");
        let evicted = engine.execute(remaining).await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(cluster.evicted(), vec!["batch-1".to_string(), "batch-2".to_string()]);
    }

    #[tokio::test]
    async fn test_already_evicted_victim_counts_as_done() {
        let cluster = Arc::new(FakeCluster::new());
        let engine = PreemptionEngine::new(cluster.clone());

        let plan = EvictionPlan {
            node: "node-a".to_string(),
            preemptor_priority: 10,
            victims: vec![workload("gone", 0.5, 0.0, 1)],
        };
        let evicted = engine.execute(plan).await.unwrap();
        assert_eq!(evicted.len(), 1);
    }

    #[tokio::test]
    async fn test_list_failure_is_reported() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fail_list_running(true);

        let engine = PreemptionEngine::new(cluster.clone());
        let err = engine
            .try_preempt(&demand(), "node-a", &tight_node())
            .await
            .unwrap_err();
        assert!(matches!(err, PreemptionError::ListFailed { ref node, .. } if node == "node-a"));
    }
}
