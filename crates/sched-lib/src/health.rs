//! Component health for liveness and readiness probes
//!
//! The scheduler tracks three components: the metrics source, the node
//! cache and the cluster API. Losing the metrics source alone leaves the
//! scheduler operational, since the cache keeps serving last-known or
//! fallback states. The cache and the cluster API are critical.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working on stale or fallback data
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }
}

/// Component names for health tracking
pub mod components {
    pub const METRICS_SOURCE: &str = "metrics_source";
    pub const NODE_CACHE: &str = "node_cache";
    pub const CLUSTER_API: &str = "cluster_api";

    /// Components whose failure makes the scheduler unusable
    pub const CRITICAL: [&str; 2] = [NODE_CACHE, CLUSTER_API];

    pub fn is_critical(name: &str) -> bool {
        CRITICAL.contains(&name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered its current status
    pub since: DateTime<Utc>,
    /// Reports in a row that were not healthy
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
            consecutive_failures: u32::from(status != ComponentStatus::Healthy),
        }
    }

    /// Fold a new report into this entry, keeping `since` while the
    /// status is unchanged
    fn observe(&mut self, status: ComponentStatus, message: Option<String>) {
        if status != self.status {
            self.status = status;
            self.since = Utc::now();
        }
        self.message = message;
        self.consecutive_failures = match status {
            ComponentStatus::Healthy => 0,
            _ => self.consecutive_failures.saturating_add(1),
        };
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Overall status: the worst critical status, with non-critical
    /// failures capped at degraded
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .iter()
            .map(|(name, health)| match health.status {
                ComponentStatus::Unhealthy if !components::is_critical(name) => {
                    ComponentStatus::Degraded
                }
                status => status,
            })
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` as healthy
    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::new(ComponentStatus::Healthy, None));
    }

    async fn report(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        match state.components.get_mut(name) {
            Some(entry) => entry.observe(status, message),
            None => {
                state
                    .components
                    .insert(name.to_string(), ComponentHealth::new(status, message));
            }
        }
    }

    pub async fn set_healthy(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Flip the startup flag; readiness stays false until this is set
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.state.read().await.components.get(name).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Scheduler not yet initialized".to_string()),
            };
        }

        let failed = state.components.iter().find(|(name, health)| {
            components::is_critical(name) && health.status == ComponentStatus::Unhealthy
        });
        match failed {
            Some((name, health)) => ReadinessResponse {
                ready: false,
                reason: Some(match &health.message {
                    Some(message) => format!("{name} unhealthy: {message}"),
                    None => format!("{name} unhealthy"),
                }),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_metrics_source_keeps_service_operational() {
        let registry = HealthRegistry::new();
        registry.register(components::METRICS_SOURCE).await;
        registry.register(components::NODE_CACHE).await;

        registry
            .set_degraded(components::METRICS_SOURCE, "2 nodes using fallback values")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());

        let source = registry.component(components::METRICS_SOURCE).await.unwrap();
        assert_eq!(source.message.as_deref(), Some("2 nodes using fallback values"));
        assert_eq!(source.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_metrics_source_only_degrades() {
        let registry = HealthRegistry::new();
        registry.register(components::NODE_CACHE).await;
        registry
            .set_unhealthy(components::METRICS_SOURCE, "connection refused")
            .await;
        registry.set_ready(true).await;

        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_unhealthy_cluster_api_fails_health_and_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::NODE_CACHE).await;
        registry.register(components::CLUSTER_API).await;
        registry.set_ready(true).await;

        registry
            .set_unhealthy(components::CLUSTER_API, "list nodes failed")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("cluster_api unhealthy: list nodes failed")
        );
    }

    #[tokio::test]
    async fn test_readiness_waits_for_startup() {
        let registry = HealthRegistry::new();

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_failure_streak_and_transition_time() {
        let registry = HealthRegistry::new();
        registry.register(components::METRICS_SOURCE).await;

        registry.set_degraded(components::METRICS_SOURCE, "a").await;
        let first = registry.component(components::METRICS_SOURCE).await.unwrap();
        registry.set_degraded(components::METRICS_SOURCE, "b").await;
        let second = registry.component(components::METRICS_SOURCE).await.unwrap();

        assert_eq!(second.consecutive_failures, 2);
        assert_eq!(second.since, first.since);
        assert_eq!(second.message.as_deref(), Some("b"));

        registry.set_healthy(components::METRICS_SOURCE).await;
        let recovered = registry.component(components::METRICS_SOURCE).await.unwrap();
        assert_eq!(recovered.consecutive_failures, 0);
        assert!(recovered.message.is_none());
    }
}
