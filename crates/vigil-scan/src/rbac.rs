//! Plugin RBAC bootstrap
//!
//! Plugin pods run as a ServiceAccount in the scan's namespace. Every
//! ClusterScan using that namespace adds itself as an owner so the account
//! is collected with the last of them. The account is then added as a
//! subject of a shared, pre-existing ClusterRoleBinding that other writers
//! also modify: membership is checked before appending, and a lost race
//! surfaces as a conflict for the caller to retry.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use vigil_common::crd::ClusterScan;
use vigil_common::kube_utils::managed_labels;

use crate::client::ScanKubeClient;
use crate::error::ScanError;

/// Subject for a ServiceAccount
pub fn service_account_subject(namespace: &str, name: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        api_group: None,
    }
}

/// Whether `binding` already lists `subject`, compared by kind, namespace and name
pub fn has_subject(binding: &ClusterRoleBinding, subject: &Subject) -> bool {
    binding.subjects.as_deref().unwrap_or_default().iter().any(|s| {
        s.kind == subject.kind
            && s.name == subject.name
            && s.namespace.as_deref().unwrap_or_default()
                == subject.namespace.as_deref().unwrap_or_default()
    })
}

/// Append `subject` unless already present. Returns true if appended.
pub fn add_subject(binding: &mut ClusterRoleBinding, subject: Subject) -> bool {
    if has_subject(binding, &subject) {
        return false;
    }
    binding.subjects.get_or_insert_with(Vec::new).push(subject);
    true
}

fn owner_reference(scan: &ClusterScan) -> Option<OwnerReference> {
    scan.owner_ref(&()).map(|mut owner| {
        owner.controller = None;
        owner.block_owner_deletion = None;
        owner
    })
}

/// Create the plugin ServiceAccount, or add `scan` to its owners.
///
/// Returns true if anything was written.
pub async fn ensure_service_account(
    client: &dyn ScanKubeClient,
    scan: &ClusterScan,
    name: &str,
) -> Result<bool, ScanError> {
    let namespace = scan.namespace().unwrap_or_default();
    let owner = owner_reference(scan);

    let existing = client
        .get_service_account(&namespace, name)
        .await
        .map_err(|e| ScanError::rbac(format!("reading ServiceAccount {}", name), e))?;

    match existing {
        None => {
            let service_account = ServiceAccount {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.clone()),
                    labels: Some(managed_labels()),
                    owner_references: owner.map(|o| vec![o]),
                    ..Default::default()
                },
                ..Default::default()
            };
            client
                .create_service_account(&namespace, &service_account)
                .await
                .map_err(|e| ScanError::rbac(format!("creating ServiceAccount {}", name), e))?;
            info!(service_account = %name, "Created plugin ServiceAccount");
            Ok(true)
        }
        Some(mut service_account) => {
            let Some(owner) = owner else {
                return Ok(false);
            };
            let owners = service_account
                .metadata
                .owner_references
                .get_or_insert_with(Vec::new);
            if owners.iter().any(|o| o.uid == owner.uid) {
                debug!(service_account = %name, "ServiceAccount already owned by scan");
                return Ok(false);
            }
            owners.push(owner);
            client
                .replace_service_account(&namespace, name, &service_account)
                .await
                .map_err(|e| ScanError::rbac(format!("updating ServiceAccount {}", name), e))?;
            Ok(true)
        }
    }
}

/// Add `subject` to the shared binding `binding_name`.
///
/// The binding must already exist. Returns true if the subject was appended,
/// false if it was already present, in which case nothing is written.
pub async fn ensure_binding_subject(
    client: &dyn ScanKubeClient,
    binding_name: &str,
    subject: Subject,
) -> Result<bool, ScanError> {
    let mut binding = client
        .get_cluster_role_binding(binding_name)
        .await
        .map_err(|e| ScanError::rbac(format!("reading ClusterRoleBinding {}", binding_name), e))?
        .ok_or_else(|| ScanError::Rbac {
            message: format!("ClusterRoleBinding {} not found", binding_name),
            source: None,
        })?;

    let subject_name = format!(
        "{}/{}",
        subject.namespace.as_deref().unwrap_or_default(),
        subject.name
    );
    if !add_subject(&mut binding, subject) {
        return Ok(false);
    }

    client
        .replace_cluster_role_binding(binding_name, &binding)
        .await
        .map_err(|e| {
            ScanError::rbac(format!("updating ClusterRoleBinding {}", binding_name), e)
        })?;
    info!(binding = %binding_name, subject = %subject_name, "Added plugin ServiceAccount to binding");
    Ok(true)
}
