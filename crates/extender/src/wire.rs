//! Extender wire types
//!
//! Field names follow the kube-scheduler extender v1 JSON tags. Decoding
//! also accepts the Go struct field names (`Pod`, `Nodes`, `NodeNames`).
//! Node objects are carried through as raw JSON.

use sched_lib::quantity::parse_quantity;
use sched_lib::{ContainerSpec, WorkloadSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Body of `/filter` and `/prioritize`
#[derive(Debug, Clone, Deserialize)]
pub struct ExtenderArgs {
    #[serde(alias = "Pod")]
    pub pod: PodObject,

    #[serde(default, alias = "Nodes")]
    pub nodes: Option<NodeList>,

    #[serde(default, alias = "NodeNames")]
    pub nodenames: Option<Vec<String>>,
}

/// A node list whose items are passed through untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Value>,

    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// `metadata.name` of a raw node object
pub fn node_name(node: &Value) -> Option<&str> {
    node.get("metadata")?.get("name")?.as_str()
}

/// Response of `/filter`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtenderFilterResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeList>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodenames: Option<Vec<String>>,

    #[serde(rename = "failedNodes")]
    pub failed_nodes: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One entry of the `/prioritize` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriority {
    pub host: String,
    pub score: i64,
}

/// The subset of a pod the scheduler reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodObject {
    #[serde(default)]
    pub metadata: PodMetadata,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub resources: Resources,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: HashMap<String, Value>,
}

/// Quantity strings and bare JSON numbers both occur in requests
fn request_quantity(requests: &HashMap<String, Value>, key: &str) -> f64 {
    match requests.get(key) {
        Some(Value::String(raw)) => parse_quantity(raw).unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0),
        _ => 0.0,
    }
}

impl From<&PodObject> for WorkloadSpec {
    fn from(pod: &PodObject) -> Self {
        WorkloadSpec {
            name: pod.metadata.name.clone(),
            namespace: pod.metadata.namespace.clone(),
            annotations: pod.metadata.annotations.clone(),
            containers: pod
                .spec
                .containers
                .iter()
                .map(|c| ContainerSpec {
                    name: c.name.clone(),
                    image: c.image.clone(),
                    cpu_request: request_quantity(&c.resources.requests, "cpu"),
                    mem_request: request_quantity(&c.resources.requests, "memory"),
                })
                .collect(),
            priority: pod.spec.priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_lowercase_and_go_field_names() {
        let lower: ExtenderArgs = serde_json::from_value(json!({
            "pod": {"metadata": {"name": "a", "namespace": "ns"}},
            "nodenames": ["n1"]
        }))
        .unwrap();
        assert_eq!(lower.nodenames, Some(vec!["n1".to_string()]));

        let go: ExtenderArgs = serde_json::from_value(json!({
            "Pod": {"metadata": {"name": "a"}},
            "Nodes": {"items": [{"metadata": {"name": "n1"}}]},
            "NodeNames": null
        }))
        .unwrap();
        assert_eq!(go.pod.metadata.name, "a");
        assert_eq!(node_name(&go.nodes.unwrap().items[0]), Some("n1"));
    }

    #[test]
    fn test_pod_to_workload() {
        let pod: PodObject = serde_json::from_value(json!({
            "metadata": {
                "name": "db",
                "namespace": "prod",
                "annotations": {"scheduler.extender/disk-read": "80M"}
            },
            "spec": {
                "priority": 100,
                "containers": [
                    {"name": "a", "image": "postgres:16", "resources": {"requests": {"cpu": "500m", "memory": "1Gi"}}},
                    {"name": "b", "image": "busybox", "resources": {"requests": {"cpu": 2}}},
                    {"name": "c", "image": "busybox"}
                ]
            }
        }))
        .unwrap();

        let spec = WorkloadSpec::from(&pod);
        assert_eq!(spec.qualified_name(), "prod/db");
        assert_eq!(spec.priority, Some(100));
        assert_eq!(spec.containers[0].cpu_request, 0.5);
        assert_eq!(spec.containers[0].mem_request, 1024.0 * 1024.0 * 1024.0);
        assert_eq!(spec.containers[1].cpu_request, 2.0);
        assert_eq!(spec.containers[2].cpu_request, 0.0);
        assert_eq!(spec.annotations.len(), 1);
    }

    #[test]
    fn test_filter_result_encoding() {
        let result = ExtenderFilterResult {
            nodenames: Some(vec!["n1".to_string()]),
            failed_nodes: BTreeMap::from([("n2".to_string(), "insufficient cpu".to_string())]),
            ..Default::default()
        };
        let encoded = serde_json::to_value(&result).unwrap();
        assert_eq!(
            encoded,
            json!({"nodenames": ["n1"], "failedNodes": {"n2": "insufficient cpu"}})
        );
    }

    #[test]
    fn test_node_list_keeps_unknown_fields() {
        let list: NodeList = serde_json::from_value(json!({
            "kind": "NodeList",
            "metadata": {"resourceVersion": "7"},
            "items": []
        }))
        .unwrap();
        let encoded = serde_json::to_value(&list).unwrap();
        assert_eq!(encoded["kind"], "NodeList");
        assert_eq!(encoded["metadata"]["resourceVersion"], "7");
    }
}
