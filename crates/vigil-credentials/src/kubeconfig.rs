//! Kubeconfig documents
//!
//! Synthesized kubeconfigs hold exactly one cluster, user and context.
//! Stored kubeconfigs are validated before use.

use serde::{Deserialize, Serialize};

/// Kubeconfig structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// API version
    pub api_version: String,
    /// Kind (always "Config")
    pub kind: String,
    /// Clusters
    pub clusters: Vec<KubeconfigCluster>,
    /// Users
    pub users: Vec<KubeconfigUser>,
    /// Contexts
    pub contexts: Vec<KubeconfigContext>,
    /// Current context
    pub current_context: String,
}

/// Cluster entry in kubeconfig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigCluster {
    /// Cluster name
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// User entry in kubeconfig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigUser {
    /// User name
    pub name: String,
    /// User config
    pub user: UserConfig,
}

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Bearer token
    pub token: String,
}

/// Context entry in kubeconfig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigContext {
    /// Context name
    pub name: String,
    /// Context config
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Cluster name (reference)
    pub cluster: String,
    /// User name (reference)
    pub user: String,
}

impl Kubeconfig {
    /// Single-context kubeconfig authenticating with a bearer token
    pub fn with_token(
        name: &str,
        server: &str,
        certificate_authority_data: Option<String>,
        token: &str,
    ) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![KubeconfigCluster {
                name: name.to_string(),
                cluster: ClusterConfig {
                    server: server.to_string(),
                    certificate_authority_data,
                },
            }],
            users: vec![KubeconfigUser {
                name: name.to_string(),
                user: UserConfig {
                    token: token.to_string(),
                },
            }],
            contexts: vec![KubeconfigContext {
                name: name.to_string(),
                context: ContextConfig {
                    cluster: name.to_string(),
                    user: name.to_string(),
                },
            }],
            current_context: name.to_string(),
        }
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Check that `document` is a kubeconfig the controllers can connect with.
///
/// Stored kubeconfigs may use any authentication scheme, so this parses with
/// kube's permissive model and only checks the structure: at least one
/// cluster, and a current (or first) context that names an existing cluster.
pub fn validate(document: &str) -> Result<(), String> {
    let config = kube::config::Kubeconfig::from_yaml(document).map_err(|e| e.to_string())?;

    if config.clusters.is_empty() {
        return Err("no clusters defined".to_string());
    }

    let selected = match config.current_context.as_deref().filter(|c| !c.is_empty()) {
        Some(name) => config
            .contexts
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| format!("current-context {} is not defined", name))?,
        None => config
            .contexts
            .first()
            .ok_or_else(|| "no contexts defined".to_string())?,
    };

    let cluster = selected
        .context
        .as_ref()
        .map(|c| c.cluster.as_str())
        .ok_or_else(|| format!("context {} has no cluster", selected.name))?;

    if !config.clusters.iter().any(|c| c.name == cluster) {
        return Err(format!(
            "context {} references unknown cluster {}",
            selected.name, cluster
        ));
    }

    Ok(())
}
