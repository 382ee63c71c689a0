//! Cluster API boundary
//!
//! Everything the core needs from the orchestrator: node and workload
//! listing, binding and eviction. All calls are remote and may fail; the
//! core never retries them.

use crate::cache::{CacheError, NodeDirectory};
use crate::models::{RunningWorkload, WorkloadSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the cluster API
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// A node as listed by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    /// Ready and not cordoned
    pub schedulable: bool,
}

impl ClusterNode {
    pub fn schedulable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedulable: true,
        }
    }
}

/// Operations the scheduler performs against the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, ClusterError>;

    /// Unbound workloads addressed to this scheduler
    async fn list_pending_workloads(&self) -> Result<Vec<WorkloadSpec>, ClusterError>;

    /// Running workloads bound to `node`
    async fn list_running_workloads(&self, node: &str)
        -> Result<Vec<RunningWorkload>, ClusterError>;

    async fn bind(&self, workload: &WorkloadSpec, node: &str) -> Result<(), ClusterError>;

    async fn evict(&self, workload: &RunningWorkload) -> Result<(), ClusterError>;
}

/// Lists the schedulable nodes of a cluster for cache sweeps
pub struct ClusterNodeDirectory {
    cluster: Arc<dyn ClusterApi>,
}

impl ClusterNodeDirectory {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl NodeDirectory for ClusterNodeDirectory {
    async fn list_nodes(&self) -> Result<Vec<String>, CacheError> {
        let nodes = self
            .cluster
            .list_nodes()
            .await
            .map_err(|e| CacheError::Directory(e.to_string()))?;
        Ok(nodes
            .into_iter()
            .filter(|n| n.schedulable)
            .map(|n| n.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    #[tokio::test]
    async fn test_directory_skips_unschedulable_nodes() {
        let cluster = FakeCluster::new();
        cluster.add_node(ClusterNode::schedulable("node-a"));
        cluster.add_node(ClusterNode {
            name: "node-b".to_string(),
            schedulable: false,
        });

        let directory = ClusterNodeDirectory::new(Arc::new(cluster));
        assert_eq!(directory.list_nodes().await.unwrap(), vec!["node-a".to_string()]);
    }

    #[test]
    fn test_not_found_display() {
        let err = ClusterError::NotFound {
            kind: "pod",
            name: "default/web-0".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "pod default/web-0 not found");
    }
}
