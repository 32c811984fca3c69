//! Scan scheduling errors

use thiserror::Error;
use vigil_common::kube_utils::is_conflict;

/// Failure of one step of a ClusterScan reconciliation
#[derive(Debug, Error)]
pub enum ScanError {
    /// The referenced Cluster could not be read or does not exist
    #[error("failed to fetch cluster {cluster}: {message}")]
    ClusterFetch {
        /// Cluster name
        cluster: String,
        /// What went wrong
        message: String,
    },

    /// The referenced Cluster is not Ready
    #[error("cluster {0} is not ready")]
    ClusterNotReady(String),

    /// The Cluster's kubeconfig Secret is unusable from the scan's namespace
    #[error("kubeconfig unavailable: {0}")]
    Kubeconfig(String),

    /// The plugin ServiceAccount or the shared binding could not be set up
    #[error("RBAC setup failed: {message}")]
    Rbac {
        /// What went wrong
        message: String,
        /// Underlying API error, if any
        #[source]
        source: Option<kube::Error>,
    },

    /// A requested Plugin is missing, unreadable or requested twice
    #[error("failed to fetch plugin {plugin}: {message}")]
    PluginFetch {
        /// `namespace/name` of the plugin
        plugin: String,
        /// What went wrong
        message: String,
    },

    /// A CronJob create, update or delete was rejected
    #[error("failed to apply CronJob {name}: {source}")]
    JobApply {
        /// CronJob name, or the label selector when listing failed
        name: String,
        /// Underlying API error
        #[source]
        source: kube::Error,
    },

    /// Jobs could not be listed or status could not be written
    #[error("failed to sync status: {0}")]
    Status(#[source] kube::Error),
}

impl ScanError {
    /// Machine-readable reason for the Ready condition
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ClusterFetch { .. } => "ClusterFetchError",
            Self::ClusterNotReady(_) => "ClusterNotReady",
            Self::Kubeconfig(_) => "KubeconfigError",
            Self::Rbac { .. } => "RBACError",
            Self::PluginFetch { .. } => "PluginFetchError",
            Self::JobApply { .. } => "JobApplyError",
            Self::Status(_) => "StatusError",
        }
    }

    /// Returns true if the API server rejected a write with 409 Conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Rbac {
                source: Some(e), ..
            }
            | Self::JobApply { source: e, .. }
            | Self::Status(e) => is_conflict(e),
            _ => false,
        }
    }

    pub(crate) fn rbac(message: impl Into<String>, source: kube::Error) -> Self {
        Self::Rbac {
            message: message.into(),
            source: Some(source),
        }
    }
}
