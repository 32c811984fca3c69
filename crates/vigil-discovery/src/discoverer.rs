//! Cluster discoverer
//!
//! [`ClusterApi`] is the seam to a member cluster; [`KubeClusterApi`] is the
//! kube-rs implementation. The functions here compose its calls into a
//! [`ClusterSnapshot`], failing the whole call on the first failed step.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{ApiResource, DynamicObject, ListParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, instrument};
use vigil_common::crd::{NodeInfo, Resources};
use vigil_common::kube_utils::is_node_ready;

#[cfg(test)]
use mockall::automock;

use crate::error::DiscoveryError;
use crate::provider::{infer_provider, infer_region};
use crate::resources::{average_across_nodes, node_resources, ResourceKind};

/// Usage reported by the metrics API for one node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeMetrics {
    /// Node name
    pub name: String,
    /// Usage per resource kind
    pub usage: BTreeMap<String, Quantity>,
}

/// Read access to a member cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Server git version (e.g. "v1.30.2")
    async fn server_version(&self) -> Result<String, kube::Error>;

    /// All nodes
    async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error>;

    /// Per-node usage from `metrics.k8s.io`
    async fn list_node_metrics(&self) -> Result<Vec<NodeMetrics>, kube::Error>;
}

/// [`ClusterApi`] backed by a kube-rs client
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap a client connected to the member cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn node_metrics_resource() -> ApiResource {
        ApiResource {
            group: "metrics.k8s.io".to_string(),
            version: "v1beta1".to_string(),
            api_version: "metrics.k8s.io/v1beta1".to_string(),
            kind: "NodeMetrics".to_string(),
            plural: "nodes".to_string(),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn server_version(&self) -> Result<String, kube::Error> {
        Ok(self.client.apiserver_version().await?.git_version)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, kube::Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_node_metrics(&self) -> Result<Vec<NodeMetrics>, kube::Error> {
        let ar = Self::node_metrics_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let list = api.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|obj| {
                let name = obj.name_any();
                let usage = obj.data.get("usage").cloned()?;
                match serde_json::from_value::<BTreeMap<String, Quantity>>(usage) {
                    Ok(usage) => Some(NodeMetrics { name, usage }),
                    Err(e) => {
                        debug!(node = %name, error = %e, "Ignoring malformed node metrics");
                        None
                    }
                }
            })
            .collect())
    }
}

/// Everything discovery learns about a cluster in one pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterSnapshot {
    /// Server git version
    pub kubernetes_version: String,
    /// Per-node details
    pub nodes: Vec<NodeInfo>,
    /// Cluster-wide usage per kind
    pub resources: BTreeMap<String, Resources>,
    /// Inferred cloud provider
    pub provider: Option<String>,
    /// Inferred region
    pub region: Option<String>,
}

/// Fetch only the server version
pub async fn version(api: &dyn ClusterApi) -> Result<String, DiscoveryError> {
    api.server_version().await.map_err(DiscoveryError::Version)
}

/// Collect nodes and metrics into a snapshot for an already known version
#[instrument(skip(api))]
pub async fn snapshot(
    api: &dyn ClusterApi,
    kubernetes_version: String,
) -> Result<ClusterSnapshot, DiscoveryError> {
    let nodes = api.list_nodes().await.map_err(DiscoveryError::Nodes)?;
    let metrics = api
        .list_node_metrics()
        .await
        .map_err(DiscoveryError::Metrics)?;

    let usage_by_node: BTreeMap<String, BTreeMap<String, Quantity>> = metrics
        .into_iter()
        .map(|m| (m.name, m.usage))
        .collect();
    let no_usage = BTreeMap::new();

    let node_infos: Vec<NodeInfo> = nodes
        .iter()
        .map(|node| {
            let name = node.name_any();
            let allocatable = node
                .status
                .as_ref()
                .and_then(|s| s.allocatable.clone())
                .unwrap_or_default();
            let usage = usage_by_node.get(&name).unwrap_or(&no_usage);
            NodeInfo {
                resources: node_resources(&name, &allocatable, usage, &ResourceKind::ALL),
                labels: node.labels().clone(),
                ready: is_node_ready(node),
                name,
            }
        })
        .collect();

    let resources = average_across_nodes(&node_infos, &ResourceKind::ALL);
    let provider = infer_provider(node_infos.iter().map(|n| &n.labels));
    let region = infer_region(node_infos.iter().map(|n| &n.labels));

    debug!(
        nodes = node_infos.len(),
        provider = provider.as_deref().unwrap_or(""),
        region = region.as_deref().unwrap_or(""),
        "Discovered cluster"
    );

    Ok(ClusterSnapshot {
        kubernetes_version,
        nodes: node_infos,
        resources,
        provider,
        region,
    })
}

/// Full discovery: version, then nodes and metrics
pub async fn discover(api: &dyn ClusterApi) -> Result<ClusterSnapshot, DiscoveryError> {
    let kubernetes_version = version(api).await?;
    snapshot(api, kubernetes_version).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use kube::api::ObjectMeta;

    fn server_error() -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "unavailable".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        })
    }

    fn make_node(name: &str, cpu: &str, memory: &str, region: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([
                    (
                        "eks.amazonaws.com/nodegroup".to_string(),
                        "workers".to_string(),
                    ),
                    (
                        "topology.kubernetes.io/region".to_string(),
                        region.to_string(),
                    ),
                ])),
                ..Default::default()
            },
            status: Some(NodeStatus {
                allocatable: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity(cpu.to_string())),
                    ("memory".to_string(), Quantity(memory.to_string())),
                ])),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn metrics(name: &str, cpu: &str, memory: &str) -> NodeMetrics {
        NodeMetrics {
            name: name.to_string(),
            usage: BTreeMap::from([
                ("cpu".to_string(), Quantity(cpu.to_string())),
                ("memory".to_string(), Quantity(memory.to_string())),
            ]),
        }
    }

    fn healthy_api() -> MockClusterApi {
        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .returning(|| Ok("v1.30.2".to_string()));
        api.expect_list_nodes().returning(|| {
            Ok(vec![
                make_node("a", "2", "4Gi", "us-east-1"),
                make_node("b", "6", "12Gi", "us-east-1"),
            ])
        });
        api.expect_list_node_metrics()
            .returning(|| Ok(vec![metrics("a", "1", "1Gi")]));
        api
    }

    #[tokio::test]
    async fn discover_builds_full_snapshot() {
        let api = healthy_api();
        let snapshot = discover(&api).await.unwrap();

        assert_eq!(snapshot.kubernetes_version, "v1.30.2");
        assert_eq!(snapshot.nodes.len(), 2);
        assert!(snapshot.nodes.iter().all(|n| n.ready));
        assert_eq!(snapshot.provider.as_deref(), Some("aws"));
        assert_eq!(snapshot.region.as_deref(), Some("us-east-1"));

        let cpu = &snapshot.resources["cpu"];
        assert_eq!(cpu.available, "8");
        assert_eq!(cpu.usage, "1");
        assert_eq!(cpu.usage_percentage, 13);

        let memory = &snapshot.resources["memory"];
        assert_eq!(memory.available, "16Gi");
        assert_eq!(memory.usage, "1Gi");
    }

    #[tokio::test]
    async fn node_without_metrics_counts_as_idle() {
        let api = healthy_api();
        let snapshot = discover(&api).await.unwrap();
        let b = snapshot.nodes.iter().find(|n| n.name == "b").unwrap();
        assert_eq!(b.resources["cpu"].usage, "0");
        assert_eq!(b.resources["cpu"].usage_percentage, 0);
    }

    #[tokio::test]
    async fn version_failure_is_reported_as_version_step() {
        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .returning(|| Err(server_error()));
        api.expect_list_nodes().never();

        let err = discover(&api).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Version(_)));
        assert_eq!(err.reason(), "ClusterVersionError");
    }

    #[tokio::test]
    async fn node_list_failure_stops_before_metrics() {
        let mut api = MockClusterApi::new();
        api.expect_list_nodes().returning(|| Err(server_error()));
        api.expect_list_node_metrics().never();

        let err = snapshot(&api, "v1.30.2".to_string()).await.unwrap_err();
        assert_eq!(err.step(), "nodes");
        assert_eq!(err.reason(), "ClusterNotDiscovered");
    }

    #[tokio::test]
    async fn metrics_failure_is_terminal() {
        let mut api = MockClusterApi::new();
        api.expect_list_nodes()
            .returning(|| Ok(vec![make_node("a", "2", "4Gi", "us-east-1")]));
        api.expect_list_node_metrics()
            .returning(|| Err(server_error()));

        let err = snapshot(&api, "v1.30.2".to_string()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Metrics(_)));
    }

    #[test]
    fn metrics_resource_targets_metrics_api() {
        let ar = KubeClusterApi::node_metrics_resource();
        assert_eq!(ar.api_version, "metrics.k8s.io/v1beta1");
        assert_eq!(ar.plural, "nodes");
    }
}
