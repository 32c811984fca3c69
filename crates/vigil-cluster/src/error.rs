//! Cluster reconciliation errors

use thiserror::Error;
use vigil_credentials::CredentialError;
use vigil_discovery::DiscoveryError;

/// Failure of one step of a Cluster reconciliation
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials could not be resolved
    #[error("credential resolution failed: {0}")]
    Credentials(#[from] CredentialError),

    /// A client for the member cluster could not be built
    #[error("failed to connect to cluster: {0}")]
    Connect(#[source] vigil_common::Error),

    /// A discovery step failed
    #[error("discovery failed at {step}: {source}", step = .source.step())]
    Discovery {
        /// The failed step
        #[from]
        source: DiscoveryError,
    },

    /// Reading ClusterScans or writing status failed
    #[error(transparent)]
    Common(#[from] vigil_common::Error),
}

impl Error {
    /// Returns true if the API server rejected a write with 409 Conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Credentials(e) => e.is_conflict(),
            Self::Common(e) => e.is_conflict(),
            Self::Connect(_) | Self::Discovery { .. } => false,
        }
    }
}
