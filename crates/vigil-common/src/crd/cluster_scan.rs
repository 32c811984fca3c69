//! ClusterScan Custom Resource Definition
//!
//! A ClusterScan schedules a set of plugins against one Cluster. The scan
//! controller turns it into one CronJob per plugin and reports the outcome of
//! the latest runs in its status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Status value of a finished Job that succeeded
pub const RUN_COMPLETE: &str = "Complete";
/// Status value of a finished Job that failed
pub const RUN_FAILED: &str = "Failed";

fn default_successful_history() -> Option<i32> {
    Some(3)
}

fn default_failed_history() -> Option<i32> {
    Some(1)
}

/// Specification for a ClusterScan
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vigil.dev",
    version = "v1alpha1",
    kind = "ClusterScan",
    plural = "clusterscans",
    shortname = "scan",
    namespaced,
    status = "ClusterScanStatus",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef.name"}"#,
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Suspend","type":"boolean","jsonPath":".status.suspend"}"#,
    printcolumn = r#"{"name":"Plugins","type":"string","jsonPath":".status.pluginNames"}"#,
    printcolumn = r#"{"name":"Last Status","type":"string","jsonPath":".status.lastFinishedStatus"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterScanSpec {
    /// Cluster to scan, in the same namespace as the ClusterScan
    pub cluster_ref: ClusterReference,

    /// Cron expression for the recurring scan
    pub schedule: String,

    /// Suspend subsequent runs; runs already started are unaffected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,

    /// Number of successful finished runs to retain
    #[serde(
        default = "default_successful_history",
        skip_serializing_if = "Option::is_none"
    )]
    pub successful_scans_history_limit: Option<i32>,

    /// Number of failed finished runs to retain
    #[serde(
        default = "default_failed_history",
        skip_serializing_if = "Option::is_none"
    )]
    pub failed_scans_history_limit: Option<i32>,

    /// Plugins to run; when unset the operator's default plugin set is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<PluginReference>>,
}

/// Name of a Cluster in the ClusterScan's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ClusterReference {
    /// Cluster name
    pub name: String,
}

/// Reference to a Plugin, optionally with extra environment for this scan
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginReference {
    /// Plugin name
    pub name: String,

    /// Plugin namespace; defaults to the ClusterScan's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Extra environment variables appended to the plugin container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<super::plugin::EnvVar>,
}

impl ClusterScanSpec {
    /// Desired suspend flag
    pub fn is_suspended(&self) -> bool {
        self.suspend.unwrap_or(false)
    }
}

/// Outcome of the latest runs of a single plugin
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginScanStatus {
    /// Last time a run was scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<DateTime<Utc>>,

    /// Identifier (Job UID) of the last finished run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_id: Option<String>,

    /// `Complete` or `Failed` for the last finished run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finished_status: Option<String>,

    /// When the last finished run ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finished_time: Option<DateTime<Utc>>,

    /// When the last successful run ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_time: Option<DateTime<Utc>>,

    /// Issues found by the last successful run, reported by the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_count: Option<i64>,
}

/// Status for a ClusterScan
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterScanStatus {
    /// The generation of the spec that was last processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Ready condition
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// `namespace/name` of the resolved Cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_namespaced_name: Option<String>,

    /// Comma separated names of the configured plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_names: Option<String>,

    /// Suspend flag applied to the CronJobs
    #[serde(default)]
    pub suspend: bool,

    /// Per plugin run outcome
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, PluginScanStatus>,

    /// Latest schedule time across plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<DateTime<Utc>>,

    /// `Failed` if any plugin's last finished run failed, else `Complete`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finished_status: Option<String>,

    /// Latest finish time across plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finished_time: Option<DateTime<Utc>>,

    /// Latest successful finish time across plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_time: Option<DateTime<Utc>>,

    /// Identifiers of the last finished run of each plugin
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_scan_ids: Vec<String>,

    /// Sum of issues reported by the plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_issues: Option<i64>,
}

impl ClusterScanStatus {
    /// Returns true if the last finished run of any plugin failed
    pub fn last_run_failed(&self) -> bool {
        self.last_finished_status.as_deref() == Some(RUN_FAILED)
    }

    /// Returns true if no plugin run has finished yet
    pub fn never_finished(&self) -> bool {
        self.last_finished_status.is_none()
    }
}
