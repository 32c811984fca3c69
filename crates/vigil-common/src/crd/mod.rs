//! Custom Resource Definitions for vigil

mod cluster;
mod cluster_scan;
mod plugin;
mod types;

pub use cluster::{
    AccessMethod, AksSpec, CloudDescriptor, CloudSpec, Cluster, ClusterSpec, ClusterStatus,
    EksSpec, GkeSpec, CONDITION_DISCOVERED, CONDITION_READY, CONDITION_SCANNED,
};
pub use cluster_scan::{
    ClusterReference, ClusterScan, ClusterScanSpec, ClusterScanStatus, PluginReference,
    PluginScanStatus, RUN_COMPLETE, RUN_FAILED,
};
pub use plugin::{
    EnvVar, Plugin, PluginSpec, PluginType, ResourceRequirements, SecurityContext,
};
pub use types::{Condition, ConditionStatus, NodeInfo, Resources, SecretRef};
