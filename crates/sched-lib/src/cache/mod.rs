//! Node resource state cache
//!
//! The cache is the only writer of [`NodeResourceState`] entries. Readers
//! get whole-struct copies. A periodic sweep ([`NodeStateCache::refresh_all`])
//! and on-demand single-node refreshes ([`NodeStateCache::refresh_one`])
//! both go through the same write path.

mod refresher;

pub use refresher::{IntervalTicker, RefreshHandle, RefreshLoop, Ticker};

use crate::health::{components, HealthRegistry};
use crate::metrics::NodeProbe;
use crate::models::{Dimension, NodeResourceState};
use crate::observability::SchedulerMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors surfaced by the cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("node {0} not found in metrics source")]
    NodeUnknown(String),

    #[error("failed to enumerate nodes: {0}")]
    Directory(String),
}

/// Source of the node names swept by [`NodeStateCache::refresh_all`]
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<String>, CacheError>;
}

/// A fixed set of node names
#[derive(Debug, Clone, Default)]
pub struct StaticNodeDirectory {
    nodes: Vec<String>,
}

impl StaticNodeDirectory {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl NodeDirectory for StaticNodeDirectory {
    async fn list_nodes(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.nodes.clone())
    }
}

/// A cache entry with its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedNode {
    pub state: NodeResourceState,
    pub refreshed_at: DateTime<Utc>,
    /// Dimensions holding fallback values rather than observed ones
    pub fallbacks: Vec<Dimension>,
}

/// Summary of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub degraded: usize,
    pub unknown: usize,
}

/// Per-process cache of node resource states
pub struct NodeStateCache {
    entries: RwLock<HashMap<String, CachedNode>>,
    /// Serializes sweeps
    sweep: Mutex<()>,
    probe: NodeProbe,
    directory: Arc<dyn NodeDirectory>,
    health: Option<HealthRegistry>,
    metrics: SchedulerMetrics,
}

impl NodeStateCache {
    pub fn new(probe: NodeProbe, directory: Arc<dyn NodeDirectory>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sweep: Mutex::new(()),
            probe,
            directory,
            health: None,
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Report refresh results to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Copy of the cached state of `node`
    pub async fn get(&self, node: &str) -> Option<NodeResourceState> {
        self.entries.read().await.get(node).map(|e| e.state)
    }

    /// All cached entries, ordered by node name
    pub async fn snapshot(&self) -> BTreeMap<String, CachedNode> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Overwrite the entry of `node`
    pub async fn store(&self, node: &str, state: NodeResourceState, fallbacks: Vec<Dimension>) {
        let entry = CachedNode {
            state: state.clamped(),
            refreshed_at: Utc::now(),
            fallbacks,
        };
        let mut entries = self.entries.write().await;
        entries.insert(node.to_string(), entry);
        self.metrics.set_cached_nodes(entries.len());
    }

    /// Fetch and store the state of one node.
    ///
    /// Fails only when the metrics source has samples but none for this
    /// node under the fail-closed match policy.
    pub async fn refresh_one(&self, node: &str) -> Result<NodeResourceState, CacheError> {
        let report = self.probe.probe(node).await;
        if report.unknown {
            debug!(node = %node, "Node absent from metrics source");
            return Err(CacheError::NodeUnknown(node.to_string()));
        }
        let state = report.state.clamped();
        self.store(node, state, report.fallbacks).await;
        Ok(state)
    }

    /// Cached state of `node`, refreshing it on a miss
    pub async fn get_or_refresh(&self, node: &str) -> Result<NodeResourceState, CacheError> {
        if let Some(state) = self.get(node).await {
            return Ok(state);
        }
        info!(node = %node, "Cache miss, refreshing node");
        self.refresh_one(node).await
    }

    /// Refresh every known node.
    ///
    /// Nodes are taken from the directory; when it fails, the nodes
    /// already cached are re-probed instead. Entries are never deleted.
    pub async fn refresh_all(&self) -> RefreshSummary {
        let _sweep = self.sweep.lock().await;
        let start = Instant::now();

        let nodes = match self.directory.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Node enumeration failed, re-probing cached nodes");
                let mut cached: Vec<String> = self.entries.read().await.keys().cloned().collect();
                cached.sort();
                cached
            }
        };

        let mut summary = RefreshSummary::default();
        let mut fresh = Vec::with_capacity(nodes.len());
        for node in nodes {
            let report = self.probe.probe(&node).await;
            if report.unknown {
                summary.unknown += 1;
                continue;
            }
            if report.is_degraded() {
                summary.degraded += 1;
            }
            summary.refreshed += 1;
            fresh.push((node, report));
        }

        let cached = {
            let mut entries = self.entries.write().await;
            let now = Utc::now();
            for (node, report) in fresh {
                entries.insert(
                    node,
                    CachedNode {
                        state: report.state.clamped(),
                        refreshed_at: now,
                        fallbacks: report.fallbacks,
                    },
                );
            }
            entries.len()
        };

        let elapsed = start.elapsed();
        self.metrics.observe_cache_refresh(elapsed.as_secs_f64(), cached);
        self.report_health(&summary, cached).await;

        debug!(
            refreshed = summary.refreshed,
            degraded = summary.degraded,
            unknown = summary.unknown,
            cached = cached,
            elapsed_ms = elapsed.as_millis() as u64,
            "Node cache refresh complete"
        );

        summary
    }

    async fn report_health(&self, summary: &RefreshSummary, cached: usize) {
        let Some(health) = &self.health else {
            return;
        };

        if summary.degraded > 0 {
            health
                .set_degraded(
                    components::METRICS_SOURCE,
                    format!("{} nodes using fallback values", summary.degraded),
                )
                .await;
        } else {
            health.set_healthy(components::METRICS_SOURCE).await;
        }

        if cached == 0 {
            health
                .set_degraded(components::NODE_CACHE, "no nodes cached")
                .await;
        } else {
            health.set_healthy(components::NODE_CACHE).await;
        }
    }

    /// Start the periodic refresh loop
    pub fn start_refresh(self: &Arc<Self>, ticker: Box<dyn Ticker>) -> RefreshHandle {
        RefreshLoop::new(Arc::clone(self), ticker).spawn()
    }
}

#[cfg(test)]
mod tests;
