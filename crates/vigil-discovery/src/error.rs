//! Discovery errors

use thiserror::Error;

/// Failure of one discovery step. No partial snapshot accompanies it.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The server version could not be fetched
    #[error("failed to get server version: {0}")]
    Version(#[source] kube::Error),

    /// The node list could not be fetched
    #[error("failed to list nodes: {0}")]
    Nodes(#[source] kube::Error),

    /// The node metrics could not be fetched
    #[error("failed to list node metrics: {0}")]
    Metrics(#[source] kube::Error),
}

impl DiscoveryError {
    /// Machine-readable reason for status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Version(_) => "ClusterVersionError",
            Self::Nodes(_) | Self::Metrics(_) => "ClusterNotDiscovered",
        }
    }

    /// Name of the step that failed
    pub fn step(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::Nodes(_) => "nodes",
            Self::Metrics(_) => "metrics",
        }
    }
}
