//! Secret access
//!
//! [`SecretStore`] is the seam the resolver reads and writes Secrets through.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::PostParams;
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

/// Get/create/replace of Secrets
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a Secret, `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;

    /// Create a Secret
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error>;

    /// Replace a Secret; `secret` must carry the resourceVersion it was read at
    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error>;
}

/// [`SecretStore`] backed by the Kubernetes API
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), secret).await
    }
}

/// Read a key from a Secret as UTF-8, preferring `data` over `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .cloned()
        })
        .filter(|v| !v.is_empty())
}
