//! Common types for vigil: CRDs, conditions, errors and Kubernetes utilities

#![deny(missing_docs)]

pub mod conditions;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod quantity;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Value of `app.kubernetes.io/managed-by` on resources created by vigil
pub const MANAGED_BY: &str = "vigil";

/// Standard label key for the managing component
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label carrying the owning ClusterScan name on CronJobs and their Jobs
pub const CLUSTER_SCAN_LABEL: &str = "vigil.dev/cluster-scan";

/// Label carrying the target Cluster name on CronJobs and their Jobs
pub const CLUSTER_LABEL: &str = "vigil.dev/cluster";

/// Label carrying the plugin name on CronJobs and their Jobs
pub const PLUGIN_LABEL: &str = "vigil.dev/plugin";

/// Secret data key holding a kubeconfig document
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "vigil-controller";
