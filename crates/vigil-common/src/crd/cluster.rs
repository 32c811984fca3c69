//! Cluster Custom Resource Definition
//!
//! A Cluster describes how to reach one member of the fleet. Its status is
//! owned by the cluster controller: connectivity, discovered capacity and a
//! summary of the scans that target it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, NodeInfo, Resources, SecretRef};
use crate::Error;

/// Condition type: the cluster API server is reachable
pub const CONDITION_READY: &str = "Ready";
/// Condition type: nodes and resources were discovered
pub const CONDITION_DISCOVERED: &str = "Discovered";
/// Condition type: the cluster has been scanned successfully
pub const CONDITION_SCANNED: &str = "Scanned";

/// Specification for a Cluster
///
/// At most one access method may be set. With neither `kubeconfigRef` nor
/// `cloud`, the controller uses its own (in-cluster) credentials.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vigil.dev",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    shortname = "vc",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".status.provider"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".status.region"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Secret holding a kubeconfig document under the `value` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_ref: Option<SecretRef>,

    /// Cloud-managed cluster descriptor; credentials are minted on demand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudSpec>,
}

/// Cloud-managed cluster descriptor. Exactly one provider must be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudSpec {
    /// Amazon EKS cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eks: Option<EksSpec>,

    /// Azure AKS cluster (not yet supported)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aks: Option<AksSpec>,

    /// Google GKE cluster (not yet supported)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gke: Option<GkeSpec>,
}

/// Amazon EKS cluster descriptor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EksSpec {
    /// EKS cluster name
    pub name: String,

    /// AWS region the cluster lives in
    pub region: String,

    /// Secret holding `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`
    pub credentials_ref: SecretRef,
}

/// Azure AKS cluster descriptor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AksSpec {
    /// AKS cluster name
    pub name: String,

    /// Azure resource group
    pub resource_group: String,

    /// Secret holding the service principal credentials
    pub credentials_ref: SecretRef,
}

/// Google GKE cluster descriptor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GkeSpec {
    /// GKE cluster name
    pub name: String,

    /// GCP project id
    pub project: String,

    /// GCP location (region or zone)
    pub location: String,

    /// Secret holding the service account key
    pub credentials_ref: SecretRef,
}

/// How the controller reaches a cluster
#[derive(Clone, Debug, PartialEq)]
pub enum AccessMethod {
    /// Use the controller's ambient credentials
    Local,
    /// Read a stored kubeconfig document
    Kubeconfig(SecretRef),
    /// Mint short-lived credentials from a cloud provider
    Cloud(CloudDescriptor),
}

/// Cloud provider specific cluster descriptor
#[derive(Clone, Debug, PartialEq)]
pub enum CloudDescriptor {
    /// Amazon EKS
    Eks(EksSpec),
    /// Azure AKS
    Aks(AksSpec),
    /// Google GKE
    Gke(GkeSpec),
}

impl CloudDescriptor {
    /// Short provider tag ("aws", "azure", "gcp")
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Eks(_) => "aws",
            Self::Aks(_) => "azure",
            Self::Gke(_) => "gcp",
        }
    }
}

impl ClusterSpec {
    /// Resolve the declared access method, rejecting ambiguous declarations
    pub fn access_method(&self) -> Result<AccessMethod, Error> {
        match (&self.kubeconfig_ref, &self.cloud) {
            (None, None) => Ok(AccessMethod::Local),
            (Some(secret), None) => Ok(AccessMethod::Kubeconfig(secret.clone())),
            (None, Some(cloud)) => cloud.descriptor().map(AccessMethod::Cloud),
            (Some(_), Some(_)) => Err(Error::validation_for_field(
                "cluster",
                "spec",
                "kubeconfigRef and cloud are mutually exclusive",
            )),
        }
    }
}

impl CloudSpec {
    /// Convert to the tagged descriptor; exactly one provider must be set
    pub fn descriptor(&self) -> Result<CloudDescriptor, Error> {
        let mut set = Vec::new();
        if let Some(eks) = &self.eks {
            set.push(CloudDescriptor::Eks(eks.clone()));
        }
        if let Some(aks) = &self.aks {
            set.push(CloudDescriptor::Aks(aks.clone()));
        }
        if let Some(gke) = &self.gke {
            set.push(CloudDescriptor::Gke(gke.clone()));
        }

        match set.len() {
            1 => Ok(set.remove(0)),
            0 => Err(Error::validation_for_field(
                "cluster",
                "spec.cloud",
                "one of eks, aks or gke must be set",
            )),
            _ => Err(Error::validation_for_field(
                "cluster",
                "spec.cloud",
                "only one of eks, aks or gke may be set",
            )),
        }
    }
}

/// Status for a Cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// The generation of the spec that was last fully reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Ready, Discovered and Scanned conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Kubernetes version reported by the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Cloud provider inferred from node labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Region inferred from node labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Number of discovered nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_nodes: Option<i32>,

    /// Discovered nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeInfo>,

    /// Cluster-wide usage per resource kind
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Resources>,

    /// Sum of issues reported by the scans targeting this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_issues: Option<i64>,

    /// Identifiers of the latest scan runs targeting this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_scans: Vec<String>,

    /// When the controller last completed a reconciliation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciliation_time: Option<DateTime<Utc>>,
}

impl ClusterStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        crate::conditions::find(&self.conditions, type_)
    }

    /// Returns true if the Ready condition is True
    pub fn is_ready(&self) -> bool {
        self.condition(CONDITION_READY)
            .map(Condition::is_true)
            .unwrap_or(false)
    }
}

impl Cluster {
    /// Returns true if the cluster status reports Ready=True
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(ClusterStatus::is_ready)
            .unwrap_or(false)
    }
}
