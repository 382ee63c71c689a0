//! Scheduling service
//!
//! Ties the cache, requirement extraction, admission, scoring and
//! preemption together. Every front end talks to the core through this
//! type.

use crate::admission::{AdmissionFilter, Verdict};
use crate::cache::{CacheError, NodeStateCache};
use crate::config::SchedulerTunables;
use crate::models::{DemandVector, NodeResourceState, RunningWorkload, WorkloadSpec};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::preemption::{PreemptionEngine, PreemptionError, PreemptionOutcome};
use crate::requirements::RequirementExtractor;
use crate::scoring::{normalize_scores, ScoringPolicy};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of checking one node against a demand
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvaluation {
    pub node: String,
    /// `None` when the node state could not be obtained
    pub state: Option<NodeResourceState>,
    pub verdict: Option<Verdict>,
    /// Score under the active policy, 0 unless admitted
    pub score: i64,
    /// Why the node was not admitted
    pub reason: Option<String>,
}

impl NodeEvaluation {
    pub fn admitted(&self) -> bool {
        matches!(self.verdict, Some(Verdict::Admit))
    }
}

/// Result of a filter call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterResult {
    /// Admitted nodes in input order
    pub feasible: Vec<String>,
    /// Rejected nodes with their reason
    pub failed: BTreeMap<String, String>,
}

/// Score of one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostScore {
    pub host: String,
    pub score: i64,
}

/// A chosen node
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub node: String,
    pub score: i64,
    /// Workloads evicted to make room, in eviction order
    pub evicted: Vec<RunningWorkload>,
}

#[derive(Debug, Error)]
pub enum PlaceError {
    #[error("no candidate nodes")]
    NoNodes,

    #[error("0/{} nodes are available", .reasons.len())]
    NoFeasibleNode { reasons: BTreeMap<String, String> },

    #[error(transparent)]
    Preemption(#[from] PreemptionError),
}

/// Filter, rank and place workloads over the node cache
pub struct SchedulingService {
    cache: Arc<NodeStateCache>,
    extractor: RequirementExtractor,
    admission: AdmissionFilter,
    scoring: Arc<dyn ScoringPolicy>,
    preemption: Option<PreemptionEngine>,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
}

impl SchedulingService {
    pub fn new(cache: Arc<NodeStateCache>, tunables: &SchedulerTunables) -> Self {
        Self {
            cache,
            extractor: RequirementExtractor::new(tunables.io_estimate),
            admission: tunables.admission_filter(),
            scoring: tunables.scoring_policy(),
            preemption: None,
            metrics: SchedulerMetrics::new(),
            logger: StructuredLogger::new(tunables.scheduler_name.clone()),
        }
    }

    /// Enable preemption through `engine`.
    ///
    /// The engine takes this service's utilization ceiling and scheduler
    /// name.
    pub fn with_preemption(mut self, engine: PreemptionEngine) -> Self {
        let engine = engine
            .with_ceiling(self.admission.ceiling())
            .with_scheduler_name(self.logger.scheduler_name());
        self.preemption = Some(engine);
        self
    }

    pub fn preemption(&self) -> Option<&PreemptionEngine> {
        self.preemption.as_ref()
    }

    pub fn cache(&self) -> &Arc<NodeStateCache> {
        &self.cache
    }

    pub fn admission(&self) -> &AdmissionFilter {
        &self.admission
    }

    pub fn scoring(&self) -> &Arc<dyn ScoringPolicy> {
        &self.scoring
    }

    pub fn preemption_enabled(&self) -> bool {
        self.preemption.is_some()
    }

    pub fn demand_for(&self, spec: &WorkloadSpec) -> DemandVector {
        self.extractor.extract(spec)
    }

    /// Check `demand` against one node, refreshing it on a cache miss
    pub async fn evaluate_node(&self, demand: &DemandVector, node: &str) -> NodeEvaluation {
        let state = match self.cache.get_or_refresh(node).await {
            Ok(state) => state,
            Err(e) => {
                debug!(node = %node, error = %e, "No state for node");
                return NodeEvaluation {
                    node: node.to_string(),
                    state: None,
                    verdict: None,
                    score: 0,
                    reason: Some(format!("failed to get stats for node {node}")),
                };
            }
        };

        self.judge(demand, node, state)
    }

    /// Score one node regardless of admission, refreshing it on a miss
    pub async fn score_node(&self, demand: &DemandVector, node: &str) -> Result<i64, CacheError> {
        let state = self.cache.get_or_refresh(node).await?;
        Ok(self.scoring.score(demand, &state))
    }

    fn judge(&self, demand: &DemandVector, node: &str, state: NodeResourceState) -> NodeEvaluation {
        let verdict = self.admission.check(demand, &state);
        let (score, reason) = match &verdict {
            Verdict::Admit => (self.scoring.score(demand, &state), None),
            Verdict::Reject(rejection) => {
                self.metrics
                    .inc_admission_rejection(rejection.dimension, rejection.kind.as_str());
                (0, Some(rejection.to_string()))
            }
        };

        NodeEvaluation {
            node: node.to_string(),
            state: Some(state),
            verdict: Some(verdict),
            score,
            reason,
        }
    }

    /// Check `demand` against every node, in input order
    pub async fn evaluate(&self, demand: &DemandVector, nodes: &[String]) -> Vec<NodeEvaluation> {
        let mut evaluations = Vec::with_capacity(nodes.len());
        for node in nodes {
            evaluations.push(self.evaluate_node(demand, node).await);
        }
        evaluations
    }

    /// Split `nodes` into admitted and rejected
    pub async fn filter(&self, spec: &WorkloadSpec, nodes: &[String]) -> FilterResult {
        let start = Instant::now();
        let demand = self.demand_for(spec);

        let mut result = FilterResult::default();
        for evaluation in self.evaluate(&demand, nodes).await {
            if evaluation.admitted() {
                result.feasible.push(evaluation.node);
            } else {
                let reason = evaluation.reason.unwrap_or_default();
                result.failed.insert(evaluation.node, reason);
            }
        }

        self.metrics
            .observe_filter_latency(start.elapsed().as_secs_f64());
        debug!(
            workload = %spec.qualified_name(),
            feasible = result.feasible.len(),
            failed = result.failed.len(),
            "Filter complete"
        );
        result
    }

    /// Score `nodes` from cached state only, in input order.
    ///
    /// Nodes with no cached state score 0.
    pub async fn prioritize(&self, spec: &WorkloadSpec, nodes: &[String]) -> Vec<HostScore> {
        let start = Instant::now();
        let demand = self.demand_for(spec);

        let mut scores = Vec::with_capacity(nodes.len());
        for node in nodes {
            let score = match self.cache.get(node).await {
                Some(state) => self.scoring.score(&demand, &state),
                None => {
                    debug!(node = %node, "No cached state, scoring 0");
                    0
                }
            };
            scores.push(score);
        }

        if self.scoring.normalizes() {
            normalize_scores(&mut scores, self.scoring.max_score());
        }

        self.metrics
            .observe_score_latency(start.elapsed().as_secs_f64());
        nodes
            .iter()
            .zip(scores)
            .map(|(host, score)| HostScore {
                host: host.clone(),
                score,
            })
            .collect()
    }

    /// Choose a node for `spec`, preempting if enabled and nothing fits.
    ///
    /// The highest score wins; ties go to the earliest node in `nodes`.
    pub async fn place(&self, spec: &WorkloadSpec, nodes: &[String]) -> Result<Placement, PlaceError> {
        let demand = self.demand_for(spec);
        self.place_demand(&spec.qualified_name(), &demand, nodes).await
    }

    /// [`Self::place`] for an already extracted demand; `workload` labels
    /// logs only
    pub async fn place_demand(
        &self,
        workload: &str,
        demand: &DemandVector,
        nodes: &[String],
    ) -> Result<Placement, PlaceError> {
        if nodes.is_empty() {
            return Err(PlaceError::NoNodes);
        }

        let evaluations = self.evaluate(demand, nodes).await;

        let mut best: Option<(String, i64)> = None;
        let mut reasons = BTreeMap::new();
        for evaluation in &evaluations {
            if evaluation.admitted() {
                if best.as_ref().map_or(true, |(_, s)| evaluation.score > *s) {
                    best = Some((evaluation.node.clone(), evaluation.score));
                }
            } else {
                reasons.insert(
                    evaluation.node.clone(),
                    evaluation.reason.clone().unwrap_or_default(),
                );
            }
        }

        if let Some((node, score)) = best {
            self.logger.log_placement(workload, &node, score, 0);
            return Ok(Placement {
                node,
                score,
                evicted: Vec::new(),
            });
        }

        if let Some(engine) = &self.preemption {
            if let Some(placement) = self
                .place_with_preemption(engine, demand, &evaluations, &mut reasons)
                .await?
            {
                self.logger.log_placement(
                    workload,
                    &placement.node,
                    placement.score,
                    placement.evicted.len(),
                );
                return Ok(placement);
            }
        }

        let summary = reasons
            .iter()
            .map(|(node, reason)| format!("{node}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ");
        self.logger
            .log_unschedulable(workload, nodes.len(), &summary);
        Err(PlaceError::NoFeasibleNode { reasons })
    }

    async fn place_with_preemption(
        &self,
        engine: &PreemptionEngine,
        demand: &DemandVector,
        evaluations: &[NodeEvaluation],
        reasons: &mut BTreeMap<String, String>,
    ) -> Result<Option<Placement>, PlaceError> {
        for evaluation in evaluations {
            let Some(state) = evaluation.state else {
                continue;
            };
            let node = evaluation.node.as_str();
            info!(node = %node, priority = demand.priority, "Attempting preemption");

            let victims = match engine.try_preempt(demand, node, &state).await {
                Ok(PreemptionOutcome::Evicted(victims)) => victims,
                Ok(PreemptionOutcome::NoCandidates) => {
                    reasons.insert(node.to_string(), "no lower-priority workloads to preempt".to_string());
                    continue;
                }
                Ok(PreemptionOutcome::Insufficient { candidates }) => {
                    reasons.insert(
                        node.to_string(),
                        format!("evicting all {candidates} lower-priority workloads would not free enough resources"),
                    );
                    continue;
                }
                Err(e @ PreemptionError::ListFailed { .. }) => {
                    warn!(node = %node, error = %e, "Preemption skipped");
                    reasons.insert(node.to_string(), e.to_string());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let fresh = match self.cache.refresh_one(node).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(node = %node, error = %e, "Refresh after preemption failed");
                    reasons.insert(node.to_string(), format!("failed to get stats for node {node}"));
                    continue;
                }
            };

            let evaluation = self.judge(demand, node, fresh);
            if evaluation.admitted() {
                return Ok(Some(Placement {
                    node: evaluation.node,
                    score: evaluation.score,
                    evicted: victims,
                }));
            }

            info!(node = %node, "Node still cannot take the workload after preemption");
            reasons.insert(
                node.to_string(),
                format!(
                    "still infeasible after preemption: {}",
                    evaluation.reason.unwrap_or_default()
                ),
            );
        }

        Ok(None)
    }
}
