//! Per-node resource probing with per-dimension fallback

use super::matcher::{InstanceMatcher, MatchKind, MatchPolicy};
use super::{queries, MetricsError, MetricsSource};
use crate::models::{Dimension, NodeResourceState};
use crate::observability::{SchedulerMetrics, StructuredLogger, DEFAULT_SCHEDULER_NAME};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// Estimates a throughput capacity from an observed rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", content = "factor", rename_all = "kebab-case")]
pub enum CapacityModel {
    /// `total = factor * rate`
    Headroom(f64),
    /// `total = rate / fraction`, where fraction is the assumed utilization
    UtilizationFraction(f64),
}

impl CapacityModel {
    pub fn capacity(&self, rate: f64) -> f64 {
        match *self {
            CapacityModel::Headroom(factor) => rate * factor.max(1.0),
            CapacityModel::UtilizationFraction(fraction) if fraction > 0.0 && fraction <= 1.0 => {
                rate / fraction
            }
            CapacityModel::UtilizationFraction(_) => rate,
        }
    }
}

/// Capacity model per throughput dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityModels {
    pub disk_read: CapacityModel,
    pub disk_write: CapacityModel,
    pub net_up: CapacityModel,
    pub net_down: CapacityModel,
}

impl Default for CapacityModels {
    fn default() -> Self {
        Self {
            disk_read: CapacityModel::Headroom(3.0),
            disk_write: CapacityModel::Headroom(3.0),
            net_up: CapacityModel::Headroom(5.0),
            net_down: CapacityModel::Headroom(5.0),
        }
    }
}

impl CapacityModels {
    fn for_dimension(&self, dim: Dimension) -> CapacityModel {
        match dim {
            Dimension::DiskRead => self.disk_read,
            Dimension::DiskWrite => self.disk_write,
            Dimension::NetUp => self.net_up,
            Dimension::NetDown => self.net_down,
            Dimension::Cpu | Dimension::Memory => CapacityModel::Headroom(1.0),
        }
    }
}

/// Node probe configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Values used for a dimension whose samples are unavailable
    pub fallback: NodeResourceState,
    pub capacity: CapacityModels,
    pub match_policy: MatchPolicy,
    /// Upper bound on each metrics query
    pub query_timeout: Duration,
    /// Name reported in fallback events
    pub scheduler_name: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback(),
            capacity: CapacityModels::default(),
            match_policy: MatchPolicy::default(),
            query_timeout: Duration::from_secs(10),
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
        }
    }
}

/// Fallback node state used when the metrics source cannot answer
pub fn default_fallback() -> NodeResourceState {
    NodeResourceState {
        cpu_total: 6.0,
        cpu_free: 2.0,
        mem_total: 32.0 * GIB,
        mem_free: 16.0 * GIB,
        disk_read_total: 500.0 * MIB,
        disk_read_free: 300.0 * MIB,
        disk_write_total: 200.0 * MIB,
        disk_write_free: 100.0 * MIB,
        net_up_total: 100.0 * MIB,
        net_up_free: 80.0 * MIB,
        net_down_total: 200.0 * MIB,
        net_down_free: 150.0 * MIB,
    }
}

/// Result of probing one node
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub state: NodeResourceState,
    /// Dimensions filled from fallback values
    pub fallbacks: Vec<Dimension>,
    /// The metrics source returned samples but none could be attributed
    /// to this node
    pub unknown: bool,
}

impl ProbeReport {
    pub fn is_degraded(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

/// Outcome of one query for one node
enum Lookup {
    Found(f64),
    /// Samples exist, none attributed to the node
    Unmatched,
    /// Empty result or query failure
    Unavailable(String),
}

impl Lookup {
    fn value(&self) -> Option<f64> {
        match self {
            Lookup::Found(v) => Some(*v),
            _ => None,
        }
    }
}

/// Builds a [`NodeResourceState`] for one node from the metrics source
#[derive(Clone)]
pub struct NodeProbe {
    source: Arc<dyn MetricsSource>,
    matcher: InstanceMatcher,
    config: ProbeConfig,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
}

impl NodeProbe {
    pub fn new(source: Arc<dyn MetricsSource>, config: ProbeConfig) -> Self {
        Self {
            source,
            matcher: InstanceMatcher::new(config.match_policy),
            logger: StructuredLogger::new(config.scheduler_name.clone()),
            config,
            metrics: SchedulerMetrics::new(),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn scheduler_name(&self) -> &str {
        self.logger.scheduler_name()
    }

    pub fn source(&self) -> Arc<dyn MetricsSource> {
        Arc::clone(&self.source)
    }

    /// Query a single expression with the configured timeout
    pub async fn query(&self, expr: &str) -> Result<HashMap<String, f64>, MetricsError> {
        match tokio::time::timeout(self.config.query_timeout, self.source.query(expr)).await {
            Ok(result) => result,
            Err(_) => Err(MetricsError::Timeout(self.config.query_timeout)),
        }
    }

    async fn lookup(&self, node: &str, expr: &str) -> Lookup {
        match self.query(expr).await {
            Ok(samples) if samples.is_empty() => Lookup::Unavailable("no samples".to_string()),
            Ok(samples) => match self.matcher.find(node, &samples) {
                Some((value, kind)) => {
                    if kind == MatchKind::Borrowed {
                        debug!(node = %node, query = %expr, "Borrowed unrelated sample for node");
                    }
                    Lookup::Found(value)
                }
                None => Lookup::Unmatched,
            },
            Err(e) => Lookup::Unavailable(e.to_string()),
        }
    }

    /// Probe every dimension of `node`.
    ///
    /// Never fails: each dimension falls back independently.
    pub async fn probe(&self, node: &str) -> ProbeReport {
        let (cpu_cores, cpu_busy, mem_total, mem_avail, disk_read, disk_write, net_up, net_down) = tokio::join!(
            self.lookup(node, queries::CPU_CORES),
            self.lookup(node, queries::CPU_BUSY),
            self.lookup(node, queries::MEM_TOTAL),
            self.lookup(node, queries::MEM_AVAILABLE),
            self.lookup(node, queries::DISK_READ),
            self.lookup(node, queries::DISK_WRITE),
            self.lookup(node, queries::NET_UP),
            self.lookup(node, queries::NET_DOWN),
        );

        let lookups = [
            &cpu_cores, &cpu_busy, &mem_total, &mem_avail, &disk_read, &disk_write, &net_up,
            &net_down,
        ];
        let any_found = lookups.iter().any(|l| matches!(l, Lookup::Found(_)));
        let any_unmatched = lookups.iter().any(|l| matches!(l, Lookup::Unmatched));
        let unknown = !any_found && any_unmatched;

        let fallback = &self.config.fallback;
        let mut state = NodeResourceState::default();
        let mut fallbacks = Vec::new();

        // CPU: total from the core count, usage from the busy rate
        match cpu_busy.value() {
            Some(busy) => {
                let total = cpu_cores.value().unwrap_or(fallback.cpu_total);
                state.set(Dimension::Cpu, total, total - busy);
            }
            None => {
                self.record_fallback(node, Dimension::Cpu, &cpu_busy);
                fallbacks.push(Dimension::Cpu);
                state.set(Dimension::Cpu, fallback.cpu_total, fallback.cpu_free);
            }
        }

        // Memory: each half falls back on its own
        let total = mem_total.value();
        let free = mem_avail.value();
        if total.is_none() || free.is_none() {
            let failed = if total.is_none() { &mem_total } else { &mem_avail };
            self.record_fallback(node, Dimension::Memory, failed);
            fallbacks.push(Dimension::Memory);
        }
        state.set(
            Dimension::Memory,
            total.unwrap_or(fallback.mem_total),
            free.unwrap_or(fallback.mem_free),
        );

        let throughput = [
            (Dimension::DiskRead, &disk_read),
            (Dimension::DiskWrite, &disk_write),
            (Dimension::NetUp, &net_up),
            (Dimension::NetDown, &net_down),
        ];
        for (dim, lookup) in throughput {
            // An idle rate says nothing about capacity
            match lookup.value().filter(|rate| *rate > 0.0) {
                Some(rate) => {
                    let total = self.config.capacity.for_dimension(dim).capacity(rate);
                    state.set(dim, total, total - rate);
                }
                None => {
                    self.record_fallback(node, dim, lookup);
                    fallbacks.push(dim);
                    state.set(dim, fallback.total(dim), fallback.free(dim));
                }
            }
        }

        ProbeReport {
            state: state.clamped(),
            fallbacks,
            unknown,
        }
    }

    fn record_fallback(&self, node: &str, dim: Dimension, lookup: &Lookup) {
        let reason = match lookup {
            Lookup::Found(_) => "zero rate",
            Lookup::Unmatched => "node not found in samples",
            Lookup::Unavailable(reason) => reason.as_str(),
        };
        self.metrics.inc_metrics_fallback(dim);
        self.logger.log_metrics_fallback(node, dim, reason);
    }
}
