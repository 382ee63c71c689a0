//! Cluster API backed by the Kubernetes API server

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{EvictParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use sched_lib::quantity::parse_quantity;
use sched_lib::{
    ClusterApi, ClusterError, ClusterNode, ContainerSpec, RunningWorkload, WorkloadSpec,
};
use tracing::debug;

/// Build a client from an explicit kubeconfig, or infer one
pub async fn connect(kubeconfig: Option<&str>) -> anyhow::Result<Client> {
    let client = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?;
            Client::try_from(config)?
        }
        None => Client::try_default().await?,
    };
    Ok(client)
}

pub struct KubeCluster {
    client: Client,
    scheduler_name: String,
}

impl KubeCluster {
    pub fn new(client: Client, scheduler_name: impl Into<String>) -> Self {
        Self {
            client,
            scheduler_name: scheduler_name.into(),
        }
    }
}

fn api_error(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        other => ClusterError::Api(other.to_string()),
    }
}

/// Ready condition true and not cordoned
pub fn node_schedulable(node: &Node) -> bool {
    let cordoned = node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True");
    ready && !cordoned
}

fn container_requests(pod: &Pod) -> Vec<ContainerSpec> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };
    spec.containers
        .iter()
        .map(|c| {
            let requests = c.resources.as_ref().and_then(|r| r.requests.as_ref());
            let request = |key: &str| {
                requests
                    .and_then(|r| r.get(key))
                    .and_then(|q| parse_quantity(&q.0))
                    .unwrap_or(0.0)
            };
            ContainerSpec {
                name: c.name.clone(),
                image: c.image.clone().unwrap_or_default(),
                cpu_request: request("cpu"),
                mem_request: request("memory"),
            }
        })
        .collect()
}

fn metadata(pod: &Pod) -> (String, String) {
    (
        pod.metadata.name.clone().unwrap_or_default(),
        pod.metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
    )
}

pub fn workload_from_pod(pod: &Pod) -> WorkloadSpec {
    let (name, namespace) = metadata(pod);
    WorkloadSpec {
        name,
        namespace,
        annotations: pod.metadata.annotations.clone().unwrap_or_default(),
        containers: container_requests(pod),
        priority: pod.spec.as_ref().and_then(|s| s.priority),
    }
}

pub fn running_from_pod(pod: &Pod) -> RunningWorkload {
    let (id, namespace) = metadata(pod);
    let containers = container_requests(pod);
    RunningWorkload {
        id,
        namespace,
        cpu_request: containers.iter().map(|c| c.cpu_request).sum(),
        mem_request: containers.iter().map(|c| c.mem_request).sum(),
        priority: pod.spec.as_ref().and_then(|s| s.priority).unwrap_or(0),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        Ok(list
            .items
            .iter()
            .map(|node| ClusterNode {
                name: node.metadata.name.clone().unwrap_or_default(),
                schedulable: node_schedulable(node),
            })
            .collect())
    }

    async fn list_pending_workloads(&self) -> Result<Vec<WorkloadSpec>, ClusterError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let selector = format!("spec.schedulerName={},spec.nodeName=", self.scheduler_name);
        let list = pods
            .list(&ListParams::default().fields(&selector))
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        Ok(list
            .items
            .iter()
            .filter(|pod| {
                let terminating = pod.metadata.deletion_timestamp.is_some();
                if terminating {
                    debug!(pod = ?pod.metadata.name, "Skipping terminating pod");
                }
                !terminating
            })
            .map(workload_from_pod)
            .collect())
    }

    async fn list_running_workloads(
        &self,
        node: &str,
    ) -> Result<Vec<RunningWorkload>, ClusterError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let selector = format!("spec.nodeName={node},status.phase=Running");
        let list = pods
            .list(&ListParams::default().fields(&selector))
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        Ok(list.items.iter().map(running_from_pod).collect())
    }

    async fn bind(&self, workload: &WorkloadSpec, node: &str) -> Result<(), ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        let binding = Binding {
            metadata: ObjectMeta {
                name: Some(workload.name.clone()),
                namespace: Some(workload.namespace.clone()),
                ..Default::default()
            },
            target: ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("Node".to_string()),
                name: Some(node.to_string()),
                ..Default::default()
            },
        };
        let body = serde_json::to_vec(&binding).map_err(|e| ClusterError::Api(e.to_string()))?;

        pods.create_subresource::<serde_json::Value>(
            "binding",
            &workload.name,
            &PostParams::default(),
            body,
        )
        .await
        .map_err(|e| api_error("pod", &workload.qualified_name(), e))?;
        Ok(())
    }

    async fn evict(&self, workload: &RunningWorkload) -> Result<(), ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        pods.evict(&workload.id, &EvictParams::default())
            .await
            .map_err(|e| api_error("pod", &workload.qualified_name(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, NodeCondition, NodeSpec, NodeStatus, PodSpec, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn container(name: &str, cpu: &str, memory: &str) -> Container {
        Container {
            name: name.to_string(),
            image: Some("nginx:1.25".to_string()),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity(cpu.to_string())),
                    ("memory".to_string(), Quantity(memory.to_string())),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(priority: Option<i32>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("shop".to_string()),
                annotations: Some(BTreeMap::from([(
                    "scheduler.extender/net-up".to_string(),
                    "30M".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![
                    container("web", "250m", "512Mi"),
                    container("sidecar", "1", "1Gi"),
                ],
                priority,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn node(ready: &str, unschedulable: Option<bool>) -> Node {
        Node {
            spec: Some(NodeSpec {
                unschedulable,
                ..Default::default()
            }),
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_workload_from_pod() {
        let spec = workload_from_pod(&pod(Some(50)));

        assert_eq!(spec.qualified_name(), "shop/web-0");
        assert_eq!(spec.priority, Some(50));
        assert_eq!(spec.containers.len(), 2);
        assert_eq!(spec.containers[0].cpu_request, 0.25);
        assert_eq!(spec.containers[0].image, "nginx:1.25");
        assert_eq!(spec.containers[1].mem_request, 1024.0 * 1024.0 * 1024.0);
        assert!(spec.annotations.contains_key("scheduler.extender/net-up"));
    }

    #[test]
    fn test_running_from_pod_sums_requests() {
        let running = running_from_pod(&pod(None));

        assert_eq!(running.id, "web-0");
        assert_eq!(running.qualified_name(), "shop/web-0");
        assert_eq!(running.cpu_request, 1.25);
        assert_eq!(running.mem_request, 1.5 * 1024.0 * 1024.0 * 1024.0);
        assert_eq!(running.priority, 0);
    }

    #[test]
    fn test_node_schedulable() {
        assert!(node_schedulable(&node("True", None)));
        assert!(node_schedulable(&node("True", Some(false))));
        assert!(!node_schedulable(&node("True", Some(true))));
        assert!(!node_schedulable(&node("False", None)));
        assert!(!node_schedulable(&node("Unknown", None)));
        assert!(!node_schedulable(&Node::default()));
    }
}
