//! In-memory collaborators for unit tests

use crate::cluster::{ClusterApi, ClusterError, ClusterNode};
use crate::metrics::{MetricsError, MetricsSource};
use crate::models::{RunningWorkload, WorkloadSpec};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Metrics source answering from a fixed table of samples
#[derive(Default)]
pub struct FakeMetricsSource {
    samples: Mutex<HashMap<String, HashMap<String, f64>>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    queries: AtomicUsize,
}

impl FakeMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, query: &str, instance: &str, value: f64) {
        self.samples
            .lock()
            .unwrap()
            .entry(query.to_string())
            .or_default()
            .insert(instance.to_string(), value);
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for FakeMetricsSource {
    async fn query(&self, expr: &str) -> Result<HashMap<String, f64>, MetricsError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MetricsError::Query("injected failure".to_string()));
        }
        Ok(self
            .samples
            .lock()
            .unwrap()
            .get(expr)
            .cloned()
            .unwrap_or_default())
    }
}

/// Cluster API backed by in-memory lists
#[derive(Default)]
pub struct FakeCluster {
    nodes: Mutex<Vec<ClusterNode>>,
    pending: Mutex<Vec<WorkloadSpec>>,
    running: Mutex<HashMap<String, Vec<RunningWorkload>>>,
    evicted: Mutex<Vec<String>>,
    bound: Mutex<Vec<(String, String)>>,
    fail_evictions: Mutex<HashSet<String>>,
    fail_list_running: AtomicBool,
    fail_bind: AtomicBool,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: ClusterNode) {
        self.nodes.lock().unwrap().push(node);
    }

    pub fn add_pending(&self, workload: WorkloadSpec) {
        self.pending.lock().unwrap().push(workload);
    }

    pub fn add_running(&self, node: &str, workload: RunningWorkload) {
        self.running
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .push(workload);
    }

    pub fn fail_eviction_of(&self, id: &str) {
        self.fail_evictions.lock().unwrap().insert(id.to_string());
    }

    pub fn allow_eviction_of(&self, id: &str) {
        self.fail_evictions.lock().unwrap().remove(id);
    }

    pub fn fail_list_running(&self, fail: bool) {
        self.fail_list_running.store(fail, Ordering::SeqCst);
    }

    pub fn fail_bind(&self, fail: bool) {
        self.fail_bind.store(fail, Ordering::SeqCst);
    }

    pub fn evicted(&self) -> Vec<String> {
        self.evicted.lock().unwrap().clone()
    }

    /// `(workload, node)` pairs in bind order
    pub fn bound(&self) -> Vec<(String, String)> {
        self.bound.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, ClusterError> {
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn list_pending_workloads(&self) -> Result<Vec<WorkloadSpec>, ClusterError> {
        let bound: HashSet<String> = self.bound().into_iter().map(|(w, _)| w).collect();
        Ok(self
            .pending
            .lock()
            .unwrap()
            .iter()
            .filter(|w| !bound.contains(&w.qualified_name()))
            .cloned()
            .collect())
    }

    async fn list_running_workloads(
        &self,
        node: &str,
    ) -> Result<Vec<RunningWorkload>, ClusterError> {
        if self.fail_list_running.load(Ordering::SeqCst) {
            return Err(ClusterError::Api("list pods failed".to_string()));
        }
        Ok(self
            .running
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default())
    }

    async fn bind(&self, workload: &WorkloadSpec, node: &str) -> Result<(), ClusterError> {
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(ClusterError::Api("binding rejected".to_string()));
        }
        self.bound
            .lock()
            .unwrap()
            .push((workload.qualified_name(), node.to_string()));
        Ok(())
    }

    async fn evict(&self, workload: &RunningWorkload) -> Result<(), ClusterError> {
        if self.fail_evictions.lock().unwrap().contains(&workload.id) {
            return Err(ClusterError::Api(format!("eviction of {} refused", workload.id)));
        }
        let mut running = self.running.lock().unwrap();
        let found = running.values_mut().any(|list| {
            let before = list.len();
            list.retain(|w| w.id != workload.id);
            list.len() != before
        });
        if !found {
            return Err(ClusterError::NotFound {
                kind: "pod",
                name: workload.qualified_name(),
            });
        }
        self.evicted.lock().unwrap().push(workload.id.clone());
        Ok(())
    }
}
