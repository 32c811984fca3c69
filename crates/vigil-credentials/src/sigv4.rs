//! AWS Signature Version 4
//!
//! Header signing for EKS API calls and query-string presigning for the STS
//! URL embedded in EKS bearer tokens. Only what those two calls need:
//! GET requests with an empty body.

use std::collections::BTreeMap;

use aws_lc_rs::{digest, hmac};
use chrono::{DateTime, Utc};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Long-lived or session AWS credentials
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Session token for temporary credentials
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything that scopes a signature
#[derive(Debug, Clone, Copy)]
pub struct SigningParams<'a> {
    /// Credentials to sign with
    pub credentials: &'a AwsCredentials,
    /// AWS region, e.g. "us-east-1"
    pub region: &'a str,
    /// Service name, e.g. "eks" or "sts"
    pub service: &'a str,
    /// Signing time
    pub time: DateTime<Utc>,
}

impl SigningParams<'_> {
    fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn date_stamp(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.date_stamp(),
            self.region,
            self.service
        )
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
        s
    })
}

fn sha256_hex(data: &[u8]) -> String {
    hex(digest::digest(&digest::SHA256, data).as_ref())
}

/// Derive the signing key for a date, region and service
pub fn signing_key(secret_access_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_access_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 percent-encoding of everything but unreserved characters
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn canonical_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Headers are keyed by lowercase name; BTreeMap keeps them sorted
fn canonical_request(
    method: &str,
    path: &str,
    query: &BTreeMap<String, String>,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> (String, String) {
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    let request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        uri_encode(path, false),
        canonical_query(query),
        canonical_headers,
        signed_headers,
        payload_hash
    );
    (request, signed_headers)
}

fn signature(params: &SigningParams<'_>, canonical_request: &str) -> String {
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        params.amz_date(),
        params.scope(),
        sha256_hex(canonical_request.as_bytes())
    );
    let key = signing_key(
        &params.credentials.secret_access_key,
        &params.date_stamp(),
        params.region,
        params.service,
    );
    hex(&hmac_sha256(&key, string_to_sign.as_bytes()))
}

/// Sign a GET request with an empty body.
///
/// Returns the headers to send, including `host`, `x-amz-date`,
/// `x-amz-security-token` (for session credentials) and `authorization`.
pub fn sign_get(
    host: &str,
    path: &str,
    query: &BTreeMap<String, String>,
    params: &SigningParams<'_>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::from([
        ("host".to_string(), host.to_string()),
        ("x-amz-date".to_string(), params.amz_date()),
    ]);
    if let Some(token) = &params.credentials.session_token {
        headers.insert("x-amz-security-token".to_string(), token.clone());
    }

    let (request, signed_headers) =
        canonical_request("GET", path, query, &headers, &sha256_hex(b""));
    let signature = signature(params, &request);

    headers.insert(
        "authorization".to_string(),
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            params.credentials.access_key_id,
            params.scope(),
            signed_headers,
            signature
        ),
    );
    headers
}

/// Presign a GET URL, authenticating via query parameters.
///
/// `extra_headers` are signed but not sent in the URL; whoever uses the URL
/// must send them. Returns `https://{host}{path}?{query}`.
pub fn presign_get(
    host: &str,
    path: &str,
    query: &BTreeMap<String, String>,
    extra_headers: &BTreeMap<String, String>,
    expires_secs: u64,
    params: &SigningParams<'_>,
) -> String {
    let mut headers: BTreeMap<String, String> = extra_headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    headers.insert("host".to_string(), host.to_string());
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

    let mut query = query.clone();
    query.insert("X-Amz-Algorithm".to_string(), ALGORITHM.to_string());
    query.insert(
        "X-Amz-Credential".to_string(),
        format!("{}/{}", params.credentials.access_key_id, params.scope()),
    );
    query.insert("X-Amz-Date".to_string(), params.amz_date());
    query.insert("X-Amz-Expires".to_string(), expires_secs.to_string());
    query.insert("X-Amz-SignedHeaders".to_string(), signed_headers);
    if let Some(token) = &params.credentials.session_token {
        query.insert("X-Amz-Security-Token".to_string(), token.clone());
    }

    let (request, _) = canonical_request("GET", path, &query, &headers, &sha256_hex(b""));
    let signature = signature(params, &request);
    query.insert("X-Amz-Signature".to_string(), signature);

    format!("https://{}{}?{}", host, path, canonical_query(&query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXAMPLE_SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn example_credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: EXAMPLE_SECRET.to_string(),
            session_token: None,
        }
    }

    #[test]
    fn signing_key_matches_published_derivation() {
        let key = signing_key(EXAMPLE_SECRET, "20120215", "us-east-1", "iam");
        assert_eq!(
            hex(&key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn vanilla_get_matches_published_signature() {
        let credentials = example_credentials();
        let params = SigningParams {
            credentials: &credentials,
            region: "us-east-1",
            service: "service",
            time: Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap(),
        };

        let headers = sign_get("example.amazonaws.com", "/", &BTreeMap::new(), &params);

        assert_eq!(headers["x-amz-date"], "20150830T123600Z");
        assert_eq!(
            headers["authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
    }

    #[test]
    fn session_token_is_signed() {
        let credentials = AwsCredentials {
            session_token: Some("session".to_string()),
            ..example_credentials()
        };
        let params = SigningParams {
            credentials: &credentials,
            region: "us-east-1",
            service: "eks",
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };

        let headers = sign_get("eks.us-east-1.amazonaws.com", "/clusters/prod", &BTreeMap::new(), &params);
        assert_eq!(headers["x-amz-security-token"], "session");
        assert!(headers["authorization"]
            .contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn presigned_url_carries_signature_and_signed_headers() {
        let credentials = example_credentials();
        let params = SigningParams {
            credentials: &credentials,
            region: "us-west-2",
            service: "sts",
            time: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        };
        let query = BTreeMap::from([
            ("Action".to_string(), "GetCallerIdentity".to_string()),
            ("Version".to_string(), "2011-06-15".to_string()),
        ]);
        let extra = BTreeMap::from([("x-k8s-aws-id".to_string(), "prod".to_string())]);

        let url = presign_get("sts.us-west-2.amazonaws.com", "/", &query, &extra, 60, &params);

        assert!(url.starts_with("https://sts.us-west-2.amazonaws.com/?Action=GetCallerIdentity"));
        assert!(url.contains("X-Amz-Expires=60"));
        assert!(url.contains("X-Amz-SignedHeaders=host%3Bx-k8s-aws-id"));
        assert!(url.contains(
            "X-Amz-Credential=AKIDEXAMPLE%2F20240501%2Fus-west-2%2Fsts%2Faws4_request"
        ));
        let signature = url
            .split(['?', '&'])
            .find_map(|kv| kv.strip_prefix("X-Amz-Signature="))
            .unwrap();
        assert_eq!(signature.len(), 64);

        let again = presign_get("sts.us-west-2.amazonaws.com", "/", &query, &extra, 60, &params);
        assert_eq!(url, again);
    }

    #[test]
    fn uri_encoding_is_rfc3986() {
        assert_eq!(uri_encode("a b/c~d", true), "a%20b%2Fc~d");
        assert_eq!(uri_encode("/clusters/prod", false), "/clusters/prod");
        assert_eq!(uri_encode("k=v&x", true), "k%3Dv%26x");
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", example_credentials());
        assert!(!rendered.contains(EXAMPLE_SECRET));
        assert!(rendered.contains("AKIDEXAMPLE"));
    }
}
