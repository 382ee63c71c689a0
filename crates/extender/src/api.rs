//! HTTP API: extender wire protocol, health checks and Prometheus metrics

use crate::wire::{node_name, ExtenderArgs, ExtenderFilterResult, HostPriority, NodeList};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sched_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::SchedulerMetrics,
    SchedulingService, WorkloadSpec,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Extender protocol routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Filter,
    Prioritize,
    Health,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::Filter, Route::Prioritize, Route::Health];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Filter => "/filter",
            Route::Prioritize => "/prioritize",
            Route::Health => "/health",
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SchedulingService>,
    pub health_registry: HealthRegistry,
    pub metrics: SchedulerMetrics,
}

impl AppState {
    pub fn new(
        service: Arc<SchedulingService>,
        health_registry: HealthRegistry,
        metrics: SchedulerMetrics,
    ) -> Self {
        Self {
            service,
            health_registry,
            metrics,
        }
    }
}

fn parse_args(body: &[u8]) -> Result<ExtenderArgs, Response> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "Malformed extender request");
        (
            StatusCode::BAD_REQUEST,
            format!("Error parsing request body: {e}"),
        )
            .into_response()
    })
}

fn json_response<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error encoding response: {e}"),
        )
            .into_response(),
    }
}

/// Candidate names in request order plus nameless node objects
fn candidates(args: &ExtenderArgs) -> (Vec<String>, BTreeMap<String, String>) {
    let mut unnamed = BTreeMap::new();
    if let Some(list) = &args.nodes {
        let mut names = Vec::with_capacity(list.items.len());
        for (idx, item) in list.items.iter().enumerate() {
            match node_name(item) {
                Some(name) => names.push(name.to_string()),
                None => {
                    unnamed.insert(format!("items[{idx}]"), "node object has no metadata.name".to_string());
                }
            }
        }
        return (names, unnamed);
    }
    (args.nodenames.clone().unwrap_or_default(), unnamed)
}

async fn filter(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let args = match parse_args(&body) {
        Ok(args) => args,
        Err(response) => return response,
    };
    let workload = WorkloadSpec::from(&args.pod);
    let (names, unnamed) = candidates(&args);
    debug!(workload = %workload.qualified_name(), nodes = names.len(), "Filter request");

    let outcome = state.service.filter(&workload, &names).await;

    let mut result = ExtenderFilterResult {
        failed_nodes: outcome.failed,
        ..Default::default()
    };
    result.failed_nodes.extend(unnamed);

    match &args.nodes {
        Some(list) => {
            let items = list
                .items
                .iter()
                .filter(|item| node_name(item).is_some_and(|n| outcome.feasible.iter().any(|f| f == n)))
                .cloned()
                .collect();
            result.nodes = Some(NodeList {
                items,
                rest: list.rest.clone(),
            });
        }
        None => result.nodenames = Some(outcome.feasible),
    }

    info!(
        workload = %workload.qualified_name(),
        failed = result.failed_nodes.len(),
        "Filter complete"
    );
    json_response(&result)
}

async fn prioritize(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let args = match parse_args(&body) {
        Ok(args) => args,
        Err(response) => return response,
    };
    let workload = WorkloadSpec::from(&args.pod);
    let (names, _) = candidates(&args);

    let priorities: Vec<HostPriority> = state
        .service
        .prioritize(&workload, &names)
        .await
        .into_iter()
        .map(|s| HostPriority {
            host: s.host,
            score: s.score,
        })
        .collect();

    if let Some(top) = priorities.iter().max_by_key(|p| p.score) {
        debug!(workload = %workload.qualified_name(), host = %top.host, score = top.score, "Prioritize complete");
    }
    json_response(&priorities)
}

async fn health() -> &'static str {
    "OK"
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode_text() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new();
    for route in Route::ALL {
        router = match route {
            Route::Filter => router.route(route.path(), post(filter)),
            Route::Prioritize => router.route(route.path(), post(prioritize)),
            Route::Health => router.route(route.path(), get(health)),
        };
    }

    router
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting extender server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
