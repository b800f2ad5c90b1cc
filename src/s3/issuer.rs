use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::error::Result;
use super::grant::{AccessGrantRequest, SignedUrlResult, StorageLocation};
use super::sigv4::{self, SigningKeyMaterial, SigningRequest};
use crate::config::Config;

/// Issues pre-signed S3 URLs locally with SigV4 query signing
///
/// No network call is made: a URL is computed from the configured
/// credentials, the request shape and the clock. The issuer is immutable and
/// `Send + Sync`, so one instance can serve any number of threads.
#[derive(Debug, Clone)]
pub struct UrlIssuer {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl UrlIssuer {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Issue a URL that downloads `location` with GET
    ///
    /// # Arguments
    ///
    /// * `location` - Bucket and key of the object (existence is not checked)
    /// * `expiry` - How long the URL stays valid; the configured default (15
    ///   minutes unless overridden) when `None`
    ///
    /// # Errors
    ///
    /// Returns `PresignError::InvalidInput` for an empty or malformed bucket or
    /// key, or an expiry outside 1 second..=7 days
    pub fn issue_read_url(
        &self,
        location: StorageLocation,
        expiry: Option<Duration>,
    ) -> Result<SignedUrlResult> {
        let mut request = AccessGrantRequest::read(location);
        request.expiry = expiry;
        self.issue(&request)
    }

    /// Issue a URL that uploads to `location` with PUT
    ///
    /// The content type is part of the signature: the upload must carry a
    /// `Content-Type` header equal to `content_type` or the store rejects it.
    ///
    /// # Errors
    ///
    /// Same as [`UrlIssuer::issue_read_url`], plus `PresignError::InvalidInput`
    /// if `content_type` is empty or not a MIME type
    pub fn issue_write_url(
        &self,
        location: StorageLocation,
        content_type: &str,
        expiry: Option<Duration>,
    ) -> Result<SignedUrlResult> {
        let mut request = AccessGrantRequest::write(location, content_type);
        request.expiry = expiry;
        self.issue(&request)
    }

    /// Issue a URL for any access grant request
    ///
    /// # Errors
    ///
    /// Returns `PresignError::InvalidInput` if the request does not validate
    pub fn issue(&self, request: &AccessGrantRequest) -> Result<SignedUrlResult> {
        let expiry = request.validate(self.config.default_expiry)?;
        let signed_at = self.clock.now().trunc_subsecs(0);
        self.sign(request, signed_at, expiry)
    }

    fn sign(
        &self,
        request: &AccessGrantRequest,
        signed_at: DateTime<Utc>,
        expiry: Duration,
    ) -> Result<SignedUrlResult> {
        let location = &request.location;
        let object_host = self.config.object_host(location);
        let canonical_uri = canonical_uri(location, object_host.bucket_in_path);
        let headers = request.signed_headers();
        let credentials = &self.config.credentials;

        let key = SigningKeyMaterial {
            access_key_id: &credentials.access_key_id,
            secret_access_key: credentials.secret_access_key(),
            session_token: credentials.session_token(),
            region: &credentials.region,
        };
        let signing_request = SigningRequest {
            method: request.operation.http_method(),
            host: &object_host.host,
            canonical_uri: &canonical_uri,
            headers: &headers,
            signed_at,
            expires_in: expiry.as_secs(),
        };
        let (params, signature) = sigv4::presign(key, &signing_request);

        let url = format!(
            "{}://{}{}?{}&{}={}",
            object_host.scheme,
            object_host.host,
            canonical_uri,
            sigv4::canonical_query(&params),
            sigv4::X_AMZ_SIGNATURE,
            signature
        );

        let expires_at = signed_at + expiry_delta(expiry);
        debug!(
            "Issued {} URL for {} (expires in {}s at {})",
            request.operation,
            location,
            expiry.as_secs(),
            expires_at
        );

        Ok(SignedUrlResult {
            url,
            operation: request.operation,
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            signed_at,
            expires_at,
            headers,
        })
    }
}

/// URI-encoded request path; the bucket leads the path in path-style addressing
pub(crate) fn canonical_uri(location: &StorageLocation, bucket_in_path: bool) -> String {
    let key = sigv4::encode_path(&location.key);
    if bucket_in_path {
        format!("/{}/{}", location.bucket, key)
    } else {
        format!("/{}", key)
    }
}

/// Expiry is whole seconds on the wire, so the timestamp is too
pub(crate) fn expiry_delta(expiry: Duration) -> chrono::Duration {
    chrono::Duration::seconds(expiry.as_secs() as i64)
}
