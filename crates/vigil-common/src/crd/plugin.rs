//! Plugin Custom Resource Definition
//!
//! A Plugin describes an inspection program packaged as a container image.
//! Plugins are read-only inputs to the scan scheduler.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Plugin
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vigil.dev",
    version = "v1alpha1",
    kind = "Plugin",
    plural = "plugins",
    shortname = "plug",
    namespaced,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    /// Container image
    pub image: String,

    /// Kind of findings the plugin reports
    #[serde(rename = "type", default)]
    pub plugin_type: PluginType,

    /// Entrypoint override
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Arguments to the entrypoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables for the plugin container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Compute resources for the plugin container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Security context for the plugin container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Mount custom checks from a ConfigMap into the plugin container
    #[serde(default)]
    pub mount_custom_checks: bool,
}

/// Category of findings a plugin produces
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Configuration and best-practice findings
    #[default]
    Misconfiguration,
    /// Known CVEs in running images
    Vulnerability,
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Misconfiguration => write!(f, "misconfiguration"),
            Self::Vulnerability => write!(f, "vulnerability"),
        }
    }
}

/// Name/value environment variable
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    /// Create a literal environment variable
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl From<&EnvVar> for corev1::EnvVar {
    fn from(env: &EnvVar) -> Self {
        corev1::EnvVar {
            name: env.name.clone(),
            value: Some(env.value.clone()),
            value_from: None,
        }
    }
}

/// Resource requests and limits as quantity strings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceRequirements {
    /// Minimum resources (e.g. cpu: "100m")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    /// Maximum resources (e.g. memory: "512Mi")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

fn quantities(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if map.is_empty() {
        return None;
    }
    Some(
        map.iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

impl From<&ResourceRequirements> for corev1::ResourceRequirements {
    fn from(res: &ResourceRequirements) -> Self {
        corev1::ResourceRequirements {
            requests: quantities(&res.requests),
            limits: quantities(&res.limits),
            ..Default::default()
        }
    }
}

/// Container security settings a plugin may request
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    /// UID to run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    /// GID to run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    /// Require a non-root UID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    /// Mount the root filesystem read-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_root_filesystem: Option<bool>,
    /// Allow setuid binaries to gain privileges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_privilege_escalation: Option<bool>,
    /// Run privileged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    /// Linux capabilities to add
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities_add: Vec<String>,
    /// Linux capabilities to drop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities_drop: Vec<String>,
}

impl From<&SecurityContext> for corev1::SecurityContext {
    fn from(sc: &SecurityContext) -> Self {
        let capabilities = if sc.capabilities_add.is_empty() && sc.capabilities_drop.is_empty() {
            None
        } else {
            Some(corev1::Capabilities {
                add: (!sc.capabilities_add.is_empty()).then(|| sc.capabilities_add.clone()),
                drop: (!sc.capabilities_drop.is_empty()).then(|| sc.capabilities_drop.clone()),
            })
        };

        corev1::SecurityContext {
            run_as_user: sc.run_as_user,
            run_as_group: sc.run_as_group,
            run_as_non_root: sc.run_as_non_root,
            read_only_root_filesystem: sc.read_only_root_filesystem,
            allow_privilege_escalation: sc.allow_privilege_escalation,
            privileged: sc.privileged,
            capabilities,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_spec_parses_from_yaml() {
        let yaml = r#"
image: ghcr.io/example/popeye:v0.21
type: misconfiguration
args: ["-f", "/etc/checks/spinach.yaml"]
env:
  - name: POPEYE_REPORT_DIR
    value: /tmp/results
resources:
  requests:
    cpu: 100m
  limits:
    memory: 512Mi
mountCustomChecks: true
"#;
        let spec: PluginSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.plugin_type, PluginType::Misconfiguration);
        assert_eq!(spec.args.len(), 2);
        assert!(spec.mount_custom_checks);
        assert_eq!(spec.env[0], EnvVar::new("POPEYE_REPORT_DIR", "/tmp/results"));
    }

    #[test]
    fn plugin_type_defaults_and_displays() {
        let spec: PluginSpec = serde_yaml::from_str("image: trivy").unwrap();
        assert_eq!(spec.plugin_type, PluginType::Misconfiguration);
        assert_eq!(PluginType::Vulnerability.to_string(), "vulnerability");
        assert!(!spec.mount_custom_checks);
    }

    #[test]
    fn resource_requirements_convert_to_quantities() {
        let res = ResourceRequirements {
            requests: BTreeMap::from([("cpu".to_string(), "100m".to_string())]),
            limits: BTreeMap::new(),
        };
        let k8s: corev1::ResourceRequirements = (&res).into();
        assert_eq!(
            k8s.requests.unwrap().get("cpu"),
            Some(&Quantity("100m".to_string()))
        );
        assert!(k8s.limits.is_none());
    }

    #[test]
    fn security_context_omits_empty_capabilities() {
        let sc = SecurityContext {
            run_as_non_root: Some(true),
            ..Default::default()
        };
        let k8s: corev1::SecurityContext = (&sc).into();
        assert_eq!(k8s.run_as_non_root, Some(true));
        assert!(k8s.capabilities.is_none());

        let dropping = SecurityContext {
            capabilities_drop: vec!["ALL".to_string()],
            ..Default::default()
        };
        let k8s: corev1::SecurityContext = (&dropping).into();
        let caps = k8s.capabilities.unwrap();
        assert_eq!(caps.drop, Some(vec!["ALL".to_string()]));
        assert!(caps.add.is_none());
    }
}
