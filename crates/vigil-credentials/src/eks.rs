//! Amazon EKS credential pathway
//!
//! Describes the cluster to learn its status, endpoint and CA, and mints the
//! same bearer token `aws eks get-token` produces: a presigned STS
//! `GetCallerIdentity` URL bound to the cluster name.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use serde::Deserialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::CredentialError;
use crate::secrets::secret_value;
pub use crate::sigv4::AwsCredentials;
use crate::sigv4::{presign_get, sign_get, SigningParams};

/// Secret key holding the access key id
pub const ACCESS_KEY_ID_KEY: &str = "AWS_ACCESS_KEY_ID";
/// Secret key holding the secret access key
pub const SECRET_ACCESS_KEY_KEY: &str = "AWS_SECRET_ACCESS_KEY";
/// Optional secret key holding a session token
pub const SESSION_TOKEN_KEY: &str = "AWS_SESSION_TOKEN";

/// EKS status meaning the control plane is serving
pub const STATUS_ACTIVE: &str = "ACTIVE";

/// Lifetime of a minted token, in seconds
pub const TOKEN_VALIDITY_SECS: i64 = 14 * 60;

/// Presigned URL expiry the token carries
const PRESIGN_EXPIRES_SECS: u64 = 60;

const TOKEN_PREFIX: &str = "k8s-aws-v1.";
const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

impl AwsCredentials {
    /// Load credentials from a Secret's data.
    ///
    /// `secret_id` is only used in error messages.
    pub fn from_secret(secret: &Secret, secret_id: &str) -> Result<Self, CredentialError> {
        let required = |key: &str| {
            secret_value(secret, key).ok_or_else(|| CredentialError::MissingCredentialKey {
                secret: secret_id.to_string(),
                key: key.to_string(),
            })
        };
        Ok(Self {
            access_key_id: required(ACCESS_KEY_ID_KEY)?,
            secret_access_key: required(SECRET_ACCESS_KEY_KEY)?,
            session_token: secret_value(secret, SESSION_TOKEN_KEY),
        })
    }
}

/// What DescribeCluster tells us
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EksClusterInfo {
    /// Cluster status (CREATING, ACTIVE, UPDATING, ...)
    pub status: String,
    /// API server URL
    pub endpoint: Option<String>,
    /// Base64 PEM of the cluster CA
    pub certificate_authority_data: Option<String>,
}

impl EksClusterInfo {
    /// Returns true if the control plane is serving
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// A bearer token for an EKS cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EksToken {
    /// `k8s-aws-v1.` token
    pub token: String,
    /// When the API server stops accepting it
    pub expires_at: DateTime<Utc>,
}

/// Calls to the EKS control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EksApi: Send + Sync {
    /// DescribeCluster
    async fn describe_cluster(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        name: &str,
    ) -> Result<EksClusterInfo, CredentialError>;

    /// Mint a bearer token for the named cluster
    fn mint_token(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        name: &str,
    ) -> Result<EksToken, CredentialError>;
}

/// [`EksApi`] over HTTPS with SigV4 signing
pub struct HttpEksApi {
    http: reqwest::Client,
}

impl HttpEksApi {
    /// Create a client with a bounded request timeout
    pub fn new() -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| CredentialError::CloudApi(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Use an existing HTTP client
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EksApi for HttpEksApi {
    async fn describe_cluster(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        name: &str,
    ) -> Result<EksClusterInfo, CredentialError> {
        let host = format!("eks.{}.amazonaws.com", region);
        let path = format!("/clusters/{}", name);
        let params = SigningParams {
            credentials,
            region,
            service: "eks",
            time: Utc::now(),
        };
        let headers = sign_get(&host, &path, &BTreeMap::new(), &params);

        let mut request = self.http.get(format!("https://{}{}", host, path));
        for (key, value) in headers.iter().filter(|(k, _)| k.as_str() != "host") {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CredentialError::CloudApi(format!("DescribeCluster {}: {}", name, e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialError::CloudApi(format!("DescribeCluster {}: {}", name, e)))?;

        if !status.is_success() {
            return Err(CredentialError::CloudApi(format!(
                "DescribeCluster {} returned {}: {}",
                name, status, body
            )));
        }

        let info = parse_describe_cluster(&body)?;
        debug!(cluster = %name, status = %info.status, "Described EKS cluster");
        Ok(info)
    }

    fn mint_token(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        name: &str,
    ) -> Result<EksToken, CredentialError> {
        Ok(presigned_token(credentials, region, name, Utc::now()))
    }
}

#[derive(Deserialize)]
struct DescribeClusterResponse {
    cluster: ClusterPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterPayload {
    status: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    certificate_authority: Option<CertificateAuthority>,
}

#[derive(Deserialize)]
struct CertificateAuthority {
    #[serde(default)]
    data: Option<String>,
}

/// Parse a DescribeCluster response body
pub fn parse_describe_cluster(body: &str) -> Result<EksClusterInfo, CredentialError> {
    let response: DescribeClusterResponse = serde_json::from_str(body)
        .map_err(|e| CredentialError::CloudApi(format!("unexpected DescribeCluster body: {}", e)))?;
    Ok(EksClusterInfo {
        status: response.cluster.status,
        endpoint: response.cluster.endpoint,
        certificate_authority_data: response.cluster.certificate_authority.and_then(|ca| ca.data),
    })
}

/// Build the bearer token for `name` as of `now`
pub fn presigned_token(
    credentials: &AwsCredentials,
    region: &str,
    name: &str,
    now: DateTime<Utc>,
) -> EksToken {
    let params = SigningParams {
        credentials,
        region,
        service: "sts",
        time: now,
    };
    let query = BTreeMap::from([
        ("Action".to_string(), "GetCallerIdentity".to_string()),
        ("Version".to_string(), "2011-06-15".to_string()),
    ]);
    let headers = BTreeMap::from([(CLUSTER_ID_HEADER.to_string(), name.to_string())]);
    let url = presign_get(
        &format!("sts.{}.amazonaws.com", region),
        "/",
        &query,
        &headers,
        PRESIGN_EXPIRES_SECS,
        &params,
    );

    EksToken {
        token: format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(url)),
        expires_at: now + chrono::Duration::seconds(TOKEN_VALIDITY_SECS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::ByteString;

    fn credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    fn secret(pairs: &[(&str, &str)]) -> Secret {
        Secret {
            data: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    mod credentials_from_secret {
        use super::*;

        #[test]
        fn reads_required_and_optional_keys() {
            let s = secret(&[
                (ACCESS_KEY_ID_KEY, "AKID"),
                (SECRET_ACCESS_KEY_KEY, "SECRET"),
                (SESSION_TOKEN_KEY, "TOKEN"),
            ]);
            let creds = AwsCredentials::from_secret(&s, "fleet/aws").unwrap();
            assert_eq!(creds.access_key_id, "AKID");
            assert_eq!(creds.session_token.as_deref(), Some("TOKEN"));
        }

        #[test]
        fn missing_secret_key_is_reported_by_name() {
            let s = secret(&[(ACCESS_KEY_ID_KEY, "AKID")]);
            match AwsCredentials::from_secret(&s, "fleet/aws").unwrap_err() {
                CredentialError::MissingCredentialKey { secret, key } => {
                    assert_eq!(secret, "fleet/aws");
                    assert_eq!(key, SECRET_ACCESS_KEY_KEY);
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn missing_access_key_is_reported() {
            let s = secret(&[(SECRET_ACCESS_KEY_KEY, "SECRET")]);
            let err = AwsCredentials::from_secret(&s, "fleet/aws").unwrap_err();
            assert!(err.to_string().contains(ACCESS_KEY_ID_KEY));
        }
    }

    mod describe_cluster {
        use super::*;

        #[test]
        fn active_cluster_parses() {
            let body = r#"{"cluster":{"name":"prod","status":"ACTIVE",
                "endpoint":"https://ABC.gr7.us-east-1.eks.amazonaws.com",
                "certificateAuthority":{"data":"LS0tLS1CRUdJTg=="}}}"#;
            let info = parse_describe_cluster(body).unwrap();
            assert!(info.is_active());
            assert_eq!(
                info.endpoint.as_deref(),
                Some("https://ABC.gr7.us-east-1.eks.amazonaws.com")
            );
            assert_eq!(info.certificate_authority_data.as_deref(), Some("LS0tLS1CRUdJTg=="));
        }

        #[test]
        fn provisioning_cluster_is_not_active() {
            let body = r#"{"cluster":{"name":"prod","status":"CREATING"}}"#;
            let info = parse_describe_cluster(body).unwrap();
            assert!(!info.is_active());
            assert!(info.endpoint.is_none());
        }

        #[test]
        fn unexpected_body_is_cloud_error() {
            let err = parse_describe_cluster(r#"{"message":"denied"}"#).unwrap_err();
            assert!(matches!(err, CredentialError::CloudApi(_)));
        }
    }

    mod token {
        use super::*;

        #[test]
        fn token_wraps_presigned_sts_url() {
            let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
            let token = presigned_token(&credentials(), "us-east-1", "prod", now);

            let encoded = token.token.strip_prefix("k8s-aws-v1.").unwrap();
            assert!(!encoded.contains('='));
            let url = String::from_utf8(URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap();

            assert!(url.starts_with("https://sts.us-east-1.amazonaws.com/?"));
            assert!(url.contains("Action=GetCallerIdentity"));
            assert!(url.contains("X-Amz-Expires=60"));
            assert!(url.contains("X-Amz-SignedHeaders=host%3Bx-k8s-aws-id"));
            assert_eq!(token.expires_at, now + chrono::Duration::minutes(14));
        }

        #[test]
        fn token_is_bound_to_cluster_name() {
            let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
            let a = presigned_token(&credentials(), "us-east-1", "prod", now);
            let b = presigned_token(&credentials(), "us-east-1", "staging", now);
            assert_ne!(a.token, b.token);
        }
    }
}
