//! Observability infrastructure for the scheduler
//!
//! Provides:
//! - Prometheus metrics (filter/score latency, cache refresh, fallbacks, preemption, binds)
//! - Structured JSON logging with tracing

use crate::models::Dimension;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    filter_latency_seconds: Histogram,
    score_latency_seconds: Histogram,
    cache_refresh_latency_seconds: Histogram,
    cached_nodes: IntGauge,
    metrics_fallbacks: IntCounterVec,
    admission_rejections: IntCounterVec,
    preemption_attempts: IntCounterVec,
    evictions: IntCounter,
    binds: IntCounterVec,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            filter_latency_seconds: register_histogram!(
                "multires_scheduler_filter_latency_seconds",
                "Time spent filtering candidate nodes for one request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register filter_latency_seconds"),

            score_latency_seconds: register_histogram!(
                "multires_scheduler_score_latency_seconds",
                "Time spent scoring candidate nodes for one request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register score_latency_seconds"),

            cache_refresh_latency_seconds: register_histogram!(
                "multires_scheduler_cache_refresh_latency_seconds",
                "Time spent refreshing the node resource cache",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cache_refresh_latency_seconds"),

            cached_nodes: register_int_gauge!(
                "multires_scheduler_cached_nodes",
                "Number of nodes held in the resource cache"
            )
            .expect("Failed to register cached_nodes"),

            metrics_fallbacks: register_int_counter_vec!(
                "multires_scheduler_metrics_fallbacks_total",
                "Dimension probes that fell back to default values",
                &["dimension"]
            )
            .expect("Failed to register metrics_fallbacks"),

            admission_rejections: register_int_counter_vec!(
                "multires_scheduler_admission_rejections_total",
                "Nodes rejected by admission, by failing dimension",
                &["dimension", "kind"]
            )
            .expect("Failed to register admission_rejections"),

            preemption_attempts: register_int_counter_vec!(
                "multires_scheduler_preemption_attempts_total",
                "Preemption attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register preemption_attempts"),

            evictions: register_int_counter!(
                "multires_scheduler_evictions_total",
                "Workloads evicted by preemption"
            )
            .expect("Failed to register evictions"),

            binds: register_int_counter_vec!(
                "multires_scheduler_binds_total",
                "Bind attempts by result",
                &["result"]
            )
            .expect("Failed to register binds"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchedulerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SchedulerMetrics")
    }
}

impl SchedulerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    pub fn observe_filter_latency(&self, duration_secs: f64) {
        self.inner().filter_latency_seconds.observe(duration_secs);
    }

    pub fn observe_score_latency(&self, duration_secs: f64) {
        self.inner().score_latency_seconds.observe(duration_secs);
    }

    pub fn observe_cache_refresh(&self, duration_secs: f64, cached_nodes: usize) {
        self.inner().cache_refresh_latency_seconds.observe(duration_secs);
        self.inner().cached_nodes.set(cached_nodes as i64);
    }

    pub fn set_cached_nodes(&self, count: usize) {
        self.inner().cached_nodes.set(count as i64);
    }

    pub fn inc_metrics_fallback(&self, dimension: Dimension) {
        self.inner()
            .metrics_fallbacks
            .with_label_values(&[dimension.as_str()])
            .inc();
    }

    pub fn inc_admission_rejection(&self, dimension: Dimension, kind: &str) {
        self.inner()
            .admission_rejections
            .with_label_values(&[dimension.as_str(), kind])
            .inc();
    }

    /// Count a preemption attempt by outcome label
    pub fn inc_preemption(&self, outcome: &str) {
        self.inner()
            .preemption_attempts
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_evictions(&self, count: usize) {
        self.inner().evictions.inc_by(count as u64);
    }

    pub fn inc_bind(&self, success: bool) {
        let label = if success { "success" } else { "failure" };
        self.inner().binds.with_label_values(&[label]).inc();
    }

    /// Encode every registered metric family in the text exposition format
    pub fn encode_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Scheduler name reported by components built without tunables
pub const DEFAULT_SCHEDULER_NAME: &str = "multi-resource-scheduler";

/// Structured logger for scheduler events
///
/// Provides consistent JSON-formatted logging for placement decisions,
/// preemption and metrics degradation.
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    scheduler_name: String,
}

impl StructuredLogger {
    pub fn new(scheduler_name: impl Into<String>) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
        }
    }

    pub fn scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    /// Log a placement decision
    pub fn log_placement(&self, workload: &str, node: &str, score: i64, evicted: usize) {
        info!(
            event = "placement_decided",
            scheduler = %self.scheduler_name,
            workload = %workload,
            node = %node,
            score = score,
            evicted = evicted,
            "Placement decided"
        );
    }

    /// Log a workload that could not be placed
    pub fn log_unschedulable(&self, workload: &str, candidates: usize, reason: &str) {
        info!(
            event = "placement_failed",
            scheduler = %self.scheduler_name,
            workload = %workload,
            candidates = candidates,
            reason = %reason,
            "No suitable node found"
        );
    }

    /// Log a completed eviction of one preemption victim
    pub fn log_eviction(&self, node: &str, victim: &str, victim_priority: i32, preemptor_priority: i32) {
        info!(
            event = "preemption_evicted",
            scheduler = %self.scheduler_name,
            node = %node,
            victim = %victim,
            victim_priority = victim_priority,
            preemptor_priority = preemptor_priority,
            "Evicted workload for preemption"
        );
    }

    /// Log a preemption that stopped part way through
    pub fn log_partial_eviction(&self, node: &str, evicted: usize, failed: &str, error: &str) {
        warn!(
            event = "preemption_partial",
            scheduler = %self.scheduler_name,
            node = %node,
            evicted = evicted,
            failed_victim = %failed,
            error = %error,
            "Preemption aborted after partial eviction"
        );
    }

    /// Log a dimension probe that used default values
    pub fn log_metrics_fallback(&self, node: &str, dimension: Dimension, reason: &str) {
        warn!(
            event = "metrics_fallback",
            scheduler = %self.scheduler_name,
            node = %node,
            dimension = %dimension,
            reason = %reason,
            "Using default resource values"
        );
    }

    /// Log scheduler startup
    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "scheduler_started",
            scheduler = %self.scheduler_name,
            version = %version,
            mode = %mode,
            "Multi-resource scheduler started"
        );
    }

    /// Log scheduler shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scheduler_shutdown",
            scheduler = %self.scheduler_name,
            reason = %reason,
            "Multi-resource scheduler shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = SchedulerMetrics::new();
        metrics.observe_filter_latency(0.002);
        metrics.observe_score_latency(0.001);
        metrics.observe_cache_refresh(0.3, 4);
        metrics.inc_metrics_fallback(Dimension::DiskRead);
        metrics.inc_admission_rejection(Dimension::Cpu, "capacity");
        metrics.inc_preemption("evicted");
        metrics.inc_evictions(2);
        metrics.inc_bind(true);
    }

    #[test]
    fn test_metrics_clone_shares_state() {
        let first = SchedulerMetrics::new();
        let second = first.clone();
        first.set_cached_nodes(3);
        second.set_cached_nodes(5);
    }

    #[test]
    fn test_encode_text_contains_families() {
        let metrics = SchedulerMetrics::new();
        metrics.inc_bind(false);
        let text = String::from_utf8(metrics.encode_text().unwrap()).unwrap();
        assert!(text.contains("multires_scheduler_binds_total"));
    }

    #[test]
    fn test_structured_logger() {
        let logger = StructuredLogger::new(DEFAULT_SCHEDULER_NAME);
        logger.log_startup("0.1.0", "extender");
        logger.log_placement("default/web-0", "node-a", 66, 0);
        logger.log_metrics_fallback("node-a", Dimension::NetUp, "query timed out");
        logger.log_shutdown("test complete");
    }
}
