//! AWS Signature Version 4, query-parameter flavor.
//!
//! Everything here is pure: the same credentials, request shape and signing
//! instant always produce the same signature.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Everything outside the RFC 3986 unreserved set
const COMPONENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Object paths keep their `/` separators
const PATH_ENCODE_SET: &AsciiSet = &COMPONENT_ENCODE_SET.remove(b'/');

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SERVICE: &str = "s3";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const SCOPE_DATE_FORMAT: &str = "%Y%m%d";
const SCOPE_TERMINATOR: &str = "aws4_request";

pub const X_AMZ_ALGORITHM: &str = "X-Amz-Algorithm";
pub const X_AMZ_CREDENTIAL: &str = "X-Amz-Credential";
pub const X_AMZ_DATE: &str = "X-Amz-Date";
pub const X_AMZ_EXPIRES: &str = "X-Amz-Expires";
pub const X_AMZ_SECURITY_TOKEN: &str = "X-Amz-Security-Token";
pub const X_AMZ_SIGNED_HEADERS: &str = "X-Amz-SignedHeaders";
pub const X_AMZ_SIGNATURE: &str = "X-Amz-Signature";

/// Shape of a request to pre-sign
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    /// Host header value, port included when non-default
    pub host: &'a str,
    /// Already URI-encoded path, starting with `/`
    pub canonical_uri: &'a str,
    /// Headers the holder must send, besides `host` (lowercase names)
    pub headers: &'a BTreeMap<String, String>,
    pub signed_at: DateTime<Utc>,
    pub expires_in: u64,
}

/// Secret material for one signature
#[derive(Clone, Copy)]
pub struct SigningKeyMaterial<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
}

/// Pre-sign a request, returning the unencoded query parameters without the
/// signature, and the signature itself
pub fn presign(
    key: SigningKeyMaterial<'_>,
    request: &SigningRequest<'_>,
) -> (Vec<(String, String)>, String) {
    let amz_date = request.signed_at.format(AMZ_DATE_FORMAT).to_string();
    let scope = credential_scope(request.signed_at, key.region);

    let mut headers = request.headers.clone();
    headers.insert("host".to_string(), request.host.to_string());
    let signed_headers = signed_header_names(&headers);

    let mut params = vec![
        (X_AMZ_ALGORITHM.to_string(), ALGORITHM.to_string()),
        (
            X_AMZ_CREDENTIAL.to_string(),
            format!("{}/{}", key.access_key_id, scope),
        ),
        (X_AMZ_DATE.to_string(), amz_date.clone()),
        (X_AMZ_EXPIRES.to_string(), request.expires_in.to_string()),
    ];
    if let Some(token) = key.session_token {
        params.push((X_AMZ_SECURITY_TOKEN.to_string(), token.to_string()));
    }
    params.push((X_AMZ_SIGNED_HEADERS.to_string(), signed_headers.clone()));

    let canonical = canonical_request(
        request.method,
        request.canonical_uri,
        &canonical_query(&params),
        &headers,
        &signed_headers,
    );
    let to_sign = string_to_sign(&amz_date, &scope, &canonical);
    let signing_key = signing_key(key.secret_access_key, request.signed_at, key.region, SERVICE);

    (params, sign(&signing_key, &to_sign))
}

/// `<date>/<region>/s3/aws4_request`
pub fn credential_scope(at: DateTime<Utc>, region: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        at.format(SCOPE_DATE_FORMAT),
        region,
        SERVICE,
        SCOPE_TERMINATOR
    )
}

/// Sorted, URI-encoded query string
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode_component(k), encode_component(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// `content-type;host;x-amz-meta-...`
pub fn signed_header_names(headers: &BTreeMap<String, String>) -> String {
    headers
        .keys()
        .map(|name| name.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(";")
}

pub fn canonical_request(
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &BTreeMap<String, String>,
    signed_headers: &str,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| {
            format!(
                "{}:{}\n",
                name.to_ascii_lowercase(),
                normalize_header_value(value)
            )
        })
        .collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_uri,
        canonical_query,
        canonical_headers,
        signed_headers,
        UNSIGNED_PAYLOAD
    )
}

pub fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

/// Derive the per-day, per-region signing key
pub fn signing_key(secret: &str, at: DateTime<Utc>, region: &str, service: &str) -> Vec<u8> {
    let date = at.format(SCOPE_DATE_FORMAT).to_string();
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

pub fn sign(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode a query name or value, `/` included
pub fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, COMPONENT_ENCODE_SET).to_string()
}

/// Percent-encode an object path, keeping `/` as-is
pub fn encode_path(input: &str) -> String {
    utf8_percent_encode(input, PATH_ENCODE_SET).to_string()
}

/// Trim and collapse runs of spaces, as SigV4 requires for header values
fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Constant-time comparison of two signatures
pub fn signatures_match(expected: &str, actual: &str) -> bool {
    let (a, b) = (expected.as_bytes(), actual.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
