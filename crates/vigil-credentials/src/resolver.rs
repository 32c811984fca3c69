//! Credential resolver
//!
//! Dispatches on the Cluster's access method. Cloud clusters that are still
//! provisioning resolve to [`Resolution::NotReady`], which is not an error:
//! the caller re-polls on a short interval.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};
use vigil_common::crd::{AccessMethod, CloudDescriptor, Cluster, EksSpec, SecretRef};
use vigil_common::kube_utils::managed_labels;
use vigil_common::KUBECONFIG_SECRET_KEY;

use crate::eks::{AwsCredentials, EksApi};
use crate::error::CredentialError;
use crate::kubeconfig::{self, Kubeconfig};
use crate::secrets::{secret_value, SecretStore};

/// Credentials usable to connect to a cluster
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Use the controller's own service account
    Ambient,
    /// Connect with a kubeconfig document
    Kubeconfig {
        /// The YAML document
        document: String,
        /// Expiry of the embedded token, for minted kubeconfigs
        expires_at: Option<DateTime<Utc>>,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ambient => write!(f, "Ambient"),
            Self::Kubeconfig { expires_at, .. } => f
                .debug_struct("Kubeconfig")
                .field("document", &"<redacted>")
                .field("expires_at", expires_at)
                .finish(),
        }
    }
}

/// Outcome of resolving a Cluster's credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Credentials are available
    Ready(Credentials),
    /// The cloud provider reports the cluster is not serving yet
    NotReady {
        /// Provider status, e.g. "CREATING"
        status: String,
    },
}

/// Name of the Secret holding a Cluster's minted kubeconfig
pub fn minted_secret_name(cluster_name: &str) -> String {
    format!("{}-kubeconfig", cluster_name)
}

/// The Secret a Cluster's kubeconfig lives in, `None` for local clusters.
///
/// Direct references resolve their namespace against the Cluster's; cloud
/// clusters point at the minted Secret, which only exists after the cluster
/// controller has resolved credentials once.
pub fn kubeconfig_secret_ref(cluster: &Cluster) -> Result<Option<SecretRef>, CredentialError> {
    let namespace = cluster.namespace().unwrap_or_default();
    match cluster.spec.access_method()? {
        AccessMethod::Local => Ok(None),
        AccessMethod::Kubeconfig(secret) => Ok(Some(SecretRef {
            namespace: Some(secret.namespace_or(&namespace).to_string()),
            name: secret.name,
        })),
        AccessMethod::Cloud(CloudDescriptor::Eks(_)) => Ok(Some(SecretRef {
            name: minted_secret_name(&cluster.name_any()),
            namespace: Some(namespace),
        })),
        AccessMethod::Cloud(other) => Err(CredentialError::UnsupportedProvider(
            other.provider().to_string(),
        )),
    }
}

/// Resolves Cluster access methods into [`Credentials`]
pub struct CredentialResolver {
    secrets: Arc<dyn SecretStore>,
    eks: Arc<dyn EksApi>,
}

impl CredentialResolver {
    /// Create a resolver over the given Secret store and EKS API
    pub fn new(secrets: Arc<dyn SecretStore>, eks: Arc<dyn EksApi>) -> Self {
        Self { secrets, eks }
    }

    /// Resolve credentials for `cluster`
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    pub async fn resolve(&self, cluster: &Cluster) -> Result<Resolution, CredentialError> {
        let namespace = cluster.namespace().unwrap_or_default();
        match cluster.spec.access_method()? {
            AccessMethod::Local => Ok(Resolution::Ready(Credentials::Ambient)),
            AccessMethod::Kubeconfig(secret_ref) => {
                let document = self.read_kubeconfig(&secret_ref, &namespace).await?;
                Ok(Resolution::Ready(Credentials::Kubeconfig {
                    document,
                    expires_at: None,
                }))
            }
            AccessMethod::Cloud(CloudDescriptor::Eks(eks)) => {
                self.resolve_eks(cluster, &namespace, &eks).await
            }
            AccessMethod::Cloud(other) => Err(CredentialError::UnsupportedProvider(
                other.provider().to_string(),
            )),
        }
    }

    /// Read and validate a stored kubeconfig
    pub async fn read_kubeconfig(
        &self,
        secret_ref: &SecretRef,
        default_namespace: &str,
    ) -> Result<String, CredentialError> {
        let namespace = secret_ref.namespace_or(default_namespace);
        let secret_id = format!("{}/{}", namespace, secret_ref.name);

        let secret = self.get_secret(namespace, &secret_ref.name).await?;
        let document = secret_value(&secret, KUBECONFIG_SECRET_KEY).ok_or_else(|| {
            CredentialError::MalformedKubeconfig {
                secret: secret_id.clone(),
                message: format!("missing key {}", KUBECONFIG_SECRET_KEY),
            }
        })?;

        kubeconfig::validate(&document).map_err(|message| CredentialError::MalformedKubeconfig {
            secret: secret_id,
            message,
        })?;
        Ok(document)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, CredentialError> {
        self.secrets
            .get(namespace, name)
            .await?
            .ok_or_else(|| CredentialError::SecretNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn resolve_eks(
        &self,
        cluster: &Cluster,
        namespace: &str,
        eks: &EksSpec,
    ) -> Result<Resolution, CredentialError> {
        let creds_namespace = eks.credentials_ref.namespace_or(namespace);
        let secret = self
            .get_secret(creds_namespace, &eks.credentials_ref.name)
            .await?;
        let credentials = AwsCredentials::from_secret(
            &secret,
            &format!("{}/{}", creds_namespace, eks.credentials_ref.name),
        )?;

        let info = self
            .eks
            .describe_cluster(&credentials, &eks.region, &eks.name)
            .await?;
        if !info.is_active() {
            debug!(eks_cluster = %eks.name, status = %info.status, "EKS cluster not active yet");
            return Ok(Resolution::NotReady {
                status: info.status,
            });
        }

        let endpoint = info.endpoint.ok_or_else(|| {
            CredentialError::CloudApi(format!("EKS cluster {} is ACTIVE without an endpoint", eks.name))
        })?;
        let token = self
            .eks
            .mint_token(&credentials, &eks.region, &eks.name)?;

        let cluster_name = cluster.name_any();
        let document = Kubeconfig::with_token(
            &cluster_name,
            &endpoint,
            info.certificate_authority_data,
            &token.token,
        )
        .to_yaml()
        .map_err(|e| CredentialError::MalformedKubeconfig {
            secret: format!("{}/{}", namespace, minted_secret_name(&cluster_name)),
            message: e.to_string(),
        })?;

        self.persist(cluster, namespace, &document).await?;
        info!(expires_at = %token.expires_at, "Minted EKS kubeconfig");

        Ok(Resolution::Ready(Credentials::Kubeconfig {
            document,
            expires_at: Some(token.expires_at),
        }))
    }

    /// Create the minted Secret, or overwrite its data if it exists
    async fn persist(
        &self,
        cluster: &Cluster,
        namespace: &str,
        document: &str,
    ) -> Result<(), CredentialError> {
        let name = minted_secret_name(&cluster.name_any());
        let data = BTreeMap::from([(
            KUBECONFIG_SECRET_KEY.to_string(),
            ByteString(document.as_bytes().to_vec()),
        )]);

        match self.secrets.get(namespace, &name).await? {
            Some(mut existing) => {
                existing.data = Some(data);
                existing.string_data = None;
                self.secrets.replace(namespace, &name, &existing).await?;
            }
            None => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(name),
                        namespace: Some(namespace.to_string()),
                        labels: Some(managed_labels()),
                        owner_references: cluster.controller_owner_ref(&()).map(|o| vec![o]),
                        ..Default::default()
                    },
                    type_: Some("Opaque".to_string()),
                    data: Some(data),
                    ..Default::default()
                };
                self.secrets.create(namespace, &secret).await?;
            }
        }
        Ok(())
    }
}
