//! Metrics collaborator boundary
//!
//! The scheduling core only needs point-in-time scalar queries keyed by
//! instance label. [`PrometheusClient`] talks to a real Prometheus server,
//! [`NodeProbe`] turns query results into a [`crate::NodeResourceState`]
//! with per-dimension fallback.

mod client;
mod directory;
mod matcher;
mod probe;

pub use client::{PrometheusClient, DEFAULT_PROMETHEUS_URL};
pub use directory::MetricsNodeDirectory;
pub use matcher::{InstanceMatcher, MatchPolicy};
pub use probe::{CapacityModel, CapacityModels, NodeProbe, ProbeConfig, ProbeReport};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a metrics source
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid metrics endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unexpected status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("metrics query failed: {0}")]
    Query(String),

    #[error("metrics query timed out after {0:?}")]
    Timeout(Duration),
}

/// A time-series store answering scalar queries
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Run `expr` and return one sample per instance label
    async fn query(&self, expr: &str) -> Result<HashMap<String, f64>, MetricsError>;
}

/// Query expressions used by the node probe
pub mod queries {
    pub const CPU_CORES: &str = r#"count by (instance) (node_cpu_seconds_total{mode="idle"})"#;
    pub const CPU_BUSY: &str =
        r#"sum by (instance) (rate(node_cpu_seconds_total{mode!="idle"}[5m]))"#;
    pub const MEM_TOTAL: &str = "node_memory_MemTotal_bytes";
    pub const MEM_AVAILABLE: &str = "node_memory_MemAvailable_bytes";
    pub const DISK_READ: &str = "sum by (instance) (rate(node_disk_read_bytes_total[5m]))";
    pub const DISK_WRITE: &str = "sum by (instance) (rate(node_disk_written_bytes_total[5m]))";
    pub const NET_UP: &str = "sum by (instance) (rate(node_network_transmit_bytes_total[5m]))";
    pub const NET_DOWN: &str = "sum by (instance) (rate(node_network_receive_bytes_total[5m]))";
}
