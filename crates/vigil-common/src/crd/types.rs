//! Supporting types shared by the vigil CRDs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, Discovered)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition's status changed
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Returns true if the condition status is `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Reference to a Secret, optionally in another namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Secret name
    pub name: String,

    /// Secret namespace; defaults to the referencing object's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretRef {
    /// Namespace to read the secret from, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default_namespace)
    }
}

/// Usage of one resource kind (cpu, memory) on a node or across a cluster
///
/// Quantities are canonical Kubernetes quantity strings. `usagePercentage`
/// is computed from integer milli-values, never from the formatted strings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Allocatable quantity
    pub available: String,
    /// Quantity currently in use
    pub usage: String,
    /// Integer percentage of `available` currently used
    pub usage_percentage: i32,
}

/// Discovered information about a single node
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Node name
    pub name: String,

    /// Node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Whether the node reports the Ready condition as True
    #[serde(default)]
    pub ready: bool,

    /// Per resource kind usage, keyed by kind name ("cpu", "memory")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Resources>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sets_timestamp() {
        let before = Utc::now();
        let condition = Condition::new(
            "Ready",
            ConditionStatus::True,
            "ClusterConnected",
            "cluster is reachable",
        );
        let after = Utc::now();

        assert_eq!(condition.type_, "Ready");
        assert!(condition.is_true());
        assert!(condition.last_transition_time >= before);
        assert!(condition.last_transition_time <= after);
    }

    #[test]
    fn condition_status_defaults_to_unknown() {
        assert_eq!(ConditionStatus::default(), ConditionStatus::Unknown);
    }

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let condition = Condition::new("Ready", ConditionStatus::False, "Oops", "");
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "False");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn secret_ref_namespace_falls_back() {
        let local = SecretRef {
            name: "kc".to_string(),
            namespace: None,
        };
        assert_eq!(local.namespace_or("fleet"), "fleet");

        let empty = SecretRef {
            name: "kc".to_string(),
            namespace: Some(String::new()),
        };
        assert_eq!(empty.namespace_or("fleet"), "fleet");

        let remote = SecretRef {
            name: "kc".to_string(),
            namespace: Some("secrets".to_string()),
        };
        assert_eq!(remote.namespace_or("fleet"), "secrets");
    }
}
