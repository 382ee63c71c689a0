//! Prometheus HTTP API client

use super::{MetricsError, MetricsSource};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const QUERY_PATH: &str = "/api/v1/query";

/// Default Prometheus endpoint inside the cluster
pub const DEFAULT_PROMETHEUS_URL: &str = "http://prometheus-server.default.svc.cluster.local:80";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

impl VectorSample {
    fn scalar(&self) -> Option<f64> {
        let raw = self.value.get(1)?.as_str()?;
        raw.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

/// Client for the Prometheus instant query endpoint
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    query_url: Url,
    http: reqwest::Client,
}

impl PrometheusClient {
    /// Create a client for `base_url`.
    ///
    /// A trailing `/api/v1/query` on the base URL is tolerated.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MetricsError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base = trimmed.strip_suffix(QUERY_PATH).unwrap_or(trimmed);
        let query_url = Url::parse(&format!("{}{}", base, QUERY_PATH))?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { query_url, http })
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn query(&self, expr: &str) -> Result<HashMap<String, f64>, MetricsError> {
        debug!(url = %self.query_url, query = %expr, "Querying Prometheus");

        let response = self
            .http
            .get(self.query_url.clone())
            .query(&[("query", expr)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse = response.json().await?;
        if parsed.status != "success" {
            return Err(MetricsError::Query(
                parsed.error.unwrap_or_else(|| format!("status {}", parsed.status)),
            ));
        }

        let data = parsed
            .data
            .ok_or_else(|| MetricsError::Query("no data in response".to_string()))?;
        if data.result_type != "vector" {
            return Err(MetricsError::Query(format!(
                "unexpected result type: {}",
                data.result_type
            )));
        }

        let mut samples = HashMap::with_capacity(data.result.len());
        for (idx, sample) in data.result.iter().enumerate() {
            let Some(value) = sample.scalar() else {
                warn!(query = %expr, value = ?sample.value, "Skipping unparsable sample");
                continue;
            };
            let key = sample
                .metric
                .get("instance")
                .or_else(|| sample.metric.get("node"))
                .cloned()
                .unwrap_or_else(|| format!("metric_{}", idx));
            samples.insert(key, value);
        }

        Ok(samples)
    }
}
