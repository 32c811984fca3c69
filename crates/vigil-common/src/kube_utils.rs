//! Kubernetes helpers shared by the vigil controllers

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};

use crate::{Error, MANAGED_BY, MANAGED_BY_LABEL};

/// Connect timeout for clients talking to member clusters
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout for clients talking to member clusters
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns true if the API server answered 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns true if the API server answered 409 (resourceVersion conflict or
/// already exists)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Build a client from an in-memory kubeconfig document.
///
/// The document's current context is used, falling back to the first one.
pub async fn client_from_kubeconfig(
    document: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(document).map_err(|e| {
        Error::serialization_for_kind("kubeconfig", format!("failed to parse kubeconfig: {}", e))
    })?;

    let options = KubeConfigOptions {
        context: kubeconfig
            .current_context
            .clone()
            .filter(|c| !c.is_empty())
            .or_else(|| kubeconfig.contexts.first().map(|c| c.name.clone())),
        ..Default::default()
    };

    let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "client_from_kubeconfig",
                format!("failed to load kubeconfig: {}", e),
            )
        })?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context(
            "client_from_kubeconfig",
            format!("failed to create client: {}", e),
        )
    })
}

/// Server-side apply body carrying only the status of a `T`
pub fn status_apply_body<T>(status: &impl serde::Serialize) -> serde_json::Value
where
    T: kube::Resource,
    <T as kube::Resource>::DynamicType: Default,
{
    let dt = T::DynamicType::default();
    serde_json::json!({
        "apiVersion": T::api_version(&dt),
        "kind": T::kind(&dt),
        "status": status,
    })
}

/// Write the status sub-resource of a namespaced resource.
///
/// Uses server-side apply under [`crate::FIELD_MANAGER`]: the applied status
/// is the complete set of fields vigil owns, so a field left out (a removed
/// plugin entry, a region that became ambiguous) is deleted from the object
/// rather than kept from an earlier write.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
) -> Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let body = status_apply_body::<T>(status);
    api.patch_status(
        name,
        &PatchParams::apply(crate::FIELD_MANAGER).force(),
        &Patch::Apply(&body),
    )
    .await?;
    Ok(())
}

/// Labels stamped on every object vigil creates
pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())])
}

/// Check if a node reports the Ready condition as True
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Short, stable hex digest of `input` (first 8 bytes of SHA-256)
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Fit `name` into `max_len` characters.
///
/// Names that already fit are returned unchanged. Longer names are cut and
/// suffixed with `-<hash>` of the full name, so distinct inputs stay distinct.
pub fn bounded_name(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let hash = deterministic_hash(name);
    let keep = max_len.saturating_sub(hash.len() + 1);
    let prefix = name[..keep].trim_end_matches('-');
    format!("{}-{}", prefix, hash)
}
