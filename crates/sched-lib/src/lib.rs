//! Scheduling core for multi-dimensional resource placement
//!
//! This crate provides:
//! - A node resource state cache fed by a metrics source
//! - Requirement extraction from workload specs and annotations
//! - Admission filtering over CPU, memory, disk and network
//! - Pluggable scoring policies
//! - Priority-based preemption
//! - A scheduling service shared by the plugin, extender and bind-loop front ends
//! - Health checks and observability

pub mod admission;
pub mod bind_loop;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod plugin;
pub mod preemption;
pub mod quantity;
pub mod requirements;
pub mod scheduler;
pub mod scoring;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::config::{FrontEnd, SchedulerTunables};
pub use admission::{AdmissionFilter, Rejection, RejectionKind, Verdict};
pub use bind_loop::{BindLoop, BindSummary};
pub use cache::{CacheError, NodeDirectory, NodeStateCache, StaticNodeDirectory};
pub use cluster::{ClusterApi, ClusterError, ClusterNode, ClusterNodeDirectory};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics::{MetricsError, MetricsSource, NodeProbe, PrometheusClient};
pub use models::*;
pub use observability::{SchedulerMetrics, StructuredLogger};
pub use plugin::{MultiResourcePlugin, PlacementPlugin, Status};
pub use preemption::{PreemptionEngine, PreemptionError, PreemptionOutcome};
pub use requirements::{IoEstimate, RequirementExtractor};
pub use scheduler::{FilterResult, HostScore, NodeEvaluation, PlaceError, Placement, SchedulingService};
pub use scoring::{ScoringMode, ScoringPolicy};
