//! HMAC-SHA256 request signing.
//!
//! Every call to the synthesis API carries an `Authorization` header derived
//! from a canonical form of the request:
//!
//! ```text
//! METHOD\nPATH\nSORTED_QUERY\nkey:value\n...\n\nSIGNED_HEADERS\nPAYLOAD_HASH
//! ```
//!
//! The canonical request is hashed into a string-to-sign scoped to
//! `date/region/service/request`, and signed with a key derived by chaining
//! HMACs over the secret key, the date, the region, the service and the
//! literal `request`. Signatures embed the timestamp, so each call is signed
//! again right before being sent.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::error::RemoteError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNING_ALGORITHM: &str = "HMAC-SHA256";
pub const HEADER_DATE: &str = "X-Date";
pub const HEADER_CONTENT_SHA256: &str = "X-Content-Sha256";
pub const HEADER_AUTHORIZATION: &str = "Authorization";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const SCOPE_TERMINATOR: &str = "request";

/// Access/secret key pair.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        if access_key.trim().is_empty() {
            return Err(RemoteError::Configuration(
                "access key is missing".to_string(),
            ));
        }
        if secret_key.trim().is_empty() {
            return Err(RemoteError::Configuration(
                "secret key is missing".to_string(),
            ));
        }
        Ok(Self {
            access_key,
            secret_key,
        })
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningScope {
    pub region: String,
    pub service: String,
}

impl SigningScope {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }

    fn credential_scope(&self, date: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            date, self.region, self.service, SCOPE_TERMINATOR
        )
    }
}

/// A request after signing. Built fresh for each HTTP call.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: String,
    pub path: String,
    /// Percent-encoded query pairs, sorted by key.
    pub query: Vec<(String, String)>,
    /// Headers to send, including the date, payload hash and authorization.
    pub headers: Vec<(String, String)>,
    pub signed_headers: String,
    pub payload_hash: String,
    pub timestamp: String,
    pub canonical_request: String,
    pub signature: String,
    pub authorization: String,
}

impl SignedRequest {
    /// The canonical query string, suitable for the request URL.
    pub fn query_string(&self) -> String {
        join_query(&self.query)
    }
}

pub struct RequestSigner {
    credentials: Credentials,
    scope: SigningScope,
}

impl RequestSigner {
    pub fn new(credentials: Credentials, scope: SigningScope) -> Self {
        Self { credentials, scope }
    }

    pub fn scope(&self) -> &SigningScope {
        &self.scope
    }

    /// Signs a request for the instant `now`.
    ///
    /// `headers` must not contain the date or payload hash headers, they are
    /// added here. Header names are matched case-insensitively.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
        body: &[u8],
        now: DateTime<Utc>,
    ) -> SignedRequest {
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let date = &timestamp[..8];
        let payload_hash = hash_sha256(body);

        let mut outgoing: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.trim().to_string()))
            .collect();
        outgoing.push((HEADER_DATE.to_string(), timestamp.clone()));
        outgoing.push((HEADER_CONTENT_SHA256.to_string(), payload_hash.clone()));

        let canonical_headers: BTreeMap<String, &str> = outgoing
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
            .collect();
        let signed_headers = canonical_headers
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";");

        let query = canonical_query(query);
        let method = method.to_ascii_uppercase();

        let mut canonical_request = String::new();
        canonical_request.push_str(&method);
        canonical_request.push('\n');
        canonical_request.push_str(path);
        canonical_request.push('\n');
        canonical_request.push_str(&join_query(&query));
        canonical_request.push('\n');
        for (key, value) in &canonical_headers {
            canonical_request.push_str(key);
            canonical_request.push(':');
            canonical_request.push_str(value);
            canonical_request.push('\n');
        }
        canonical_request.push('\n');
        canonical_request.push_str(&signed_headers);
        canonical_request.push('\n');
        canonical_request.push_str(&payload_hash);

        let credential_scope = self.scope.credential_scope(date);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            SIGNING_ALGORITHM,
            timestamp,
            credential_scope,
            hash_sha256(canonical_request.as_bytes())
        );

        let signing_key = self.signing_key(date);
        let signature = format!("{:x}", hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            SIGNING_ALGORITHM,
            self.credentials.access_key,
            credential_scope,
            signed_headers,
            signature
        );
        outgoing.push((HEADER_AUTHORIZATION.to_string(), authorization.clone()));

        SignedRequest {
            method,
            path: path.to_string(),
            query,
            headers: outgoing,
            signed_headers,
            payload_hash,
            timestamp,
            canonical_request,
            signature,
            authorization,
        }
    }

    fn signing_key(&self, date: &str) -> Vec<u8> {
        let k_date = hmac_sha256(self.credentials.secret_key.as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.scope.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.scope.service.as_bytes());
        hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes()).to_vec()
    }
}

/// Hex SHA-256 digest of `content`.
pub fn hash_sha256(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

fn hmac_sha256(key: &[u8], content: &[u8]) -> hmac::digest::Output<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(content);
    mac.finalize().into_bytes()
}

/// Percent-encodes query pairs and sorts them by key, then value.
pub fn canonical_query(query: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
}

fn join_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
