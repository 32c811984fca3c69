//! Credential resolution errors

use thiserror::Error;

/// Errors raised while resolving cluster credentials
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A referenced Secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
    },

    /// A Secret exists but does not hold a usable kubeconfig
    #[error("malformed kubeconfig in secret {secret}: {message}")]
    MalformedKubeconfig {
        /// `namespace/name` of the secret
        secret: String,
        /// What is wrong with the document
        message: String,
    },

    /// A cloud credentials Secret lacks a required key
    #[error("secret {secret} is missing key {key}")]
    MissingCredentialKey {
        /// `namespace/name` of the secret
        secret: String,
        /// The missing key
        key: String,
    },

    /// The Cluster declares an invalid combination of access methods
    #[error("invalid access method: {0}")]
    InvalidAccessMethod(String),

    /// The declared cloud provider has no credential pathway yet
    #[error("{0} clusters are not yet supported")]
    UnsupportedProvider(String),

    /// The cloud provider API failed or returned something unusable
    #[error("cloud API error: {0}")]
    CloudApi(String),

    /// The Kubernetes API failed while reading or writing a Secret
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl CredentialError {
    /// Machine-readable reason for status conditions.
    ///
    /// Configuration problems surface as `KubeconfigError`; failures to reach
    /// an API surface as `ClusterNotConnected`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SecretNotFound { .. }
            | Self::MalformedKubeconfig { .. }
            | Self::MissingCredentialKey { .. }
            | Self::InvalidAccessMethod(_)
            | Self::UnsupportedProvider(_) => "KubeconfigError",
            Self::CloudApi(_) | Self::Kube(_) => "ClusterNotConnected",
        }
    }

    /// Returns true if this wraps an HTTP 409 from the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(e) if vigil_common::kube_utils::is_conflict(e))
    }
}

impl From<vigil_common::Error> for CredentialError {
    fn from(err: vigil_common::Error) -> Self {
        match err {
            vigil_common::Error::Kube { source } => Self::Kube(source),
            vigil_common::Error::Validation { message, .. } => Self::InvalidAccessMethod(message),
            other => Self::CloudApi(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_kubeconfig_errors() {
        let err = CredentialError::SecretNotFound {
            namespace: "fleet".to_string(),
            name: "prod-kubeconfig".to_string(),
        };
        assert_eq!(err.reason(), "KubeconfigError");
        assert_eq!(err.to_string(), "secret fleet/prod-kubeconfig not found");

        assert_eq!(
            CredentialError::UnsupportedProvider("gke".to_string()).reason(),
            "KubeconfigError"
        );
    }

    #[test]
    fn transport_errors_are_not_connected() {
        let err = CredentialError::CloudApi("timeout".to_string());
        assert_eq!(err.reason(), "ClusterNotConnected");
    }

    #[test]
    fn validation_errors_map_to_invalid_access_method() {
        let err: CredentialError =
            vigil_common::Error::validation("kubeconfigRef and cloud are mutually exclusive")
                .into();
        assert!(matches!(err, CredentialError::InvalidAccessMethod(_)));
    }
}
