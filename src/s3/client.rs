use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{config::Credentials, presigning::PresigningConfig, Client};
use chrono::SubsecRound;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::error::{PresignError, Result};
use super::grant::{AccessGrantRequest, Operation, SignedUrlResult, StorageLocation};
use super::issuer::expiry_delta;
use crate::config::Config;

/// Issues pre-signed URLs through the AWS SDK presigner
///
/// Same inputs, validation and result as [`super::UrlIssuer`]. The SDK's
/// presigning API is async, but it resolves the static credentials locally
/// and never talks to S3.
#[derive(Debug, Clone)]
pub struct SdkIssuer {
    client: Client,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl SdkIssuer {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        let client = build_client(&config);
        Self {
            client,
            config,
            clock,
        }
    }

    /// Generate a pre-signed GET URL
    ///
    /// # Errors
    ///
    /// Returns `PresignError::InvalidInput` for malformed input and
    /// `PresignError::Signing` if the SDK rejects the presigning config
    pub async fn issue_read_url(
        &self,
        location: StorageLocation,
        expiry: Option<Duration>,
    ) -> Result<SignedUrlResult> {
        let mut request = AccessGrantRequest::read(location);
        request.expiry = expiry;
        self.issue(&request).await
    }

    /// Generate a pre-signed PUT URL bound to `content_type`
    ///
    /// # Errors
    ///
    /// Same as [`SdkIssuer::issue_read_url`], plus `PresignError::InvalidInput`
    /// for an empty or malformed content type
    pub async fn issue_write_url(
        &self,
        location: StorageLocation,
        content_type: &str,
        expiry: Option<Duration>,
    ) -> Result<SignedUrlResult> {
        let mut request = AccessGrantRequest::write(location, content_type);
        request.expiry = expiry;
        self.issue(&request).await
    }

    /// # Errors
    ///
    /// See [`SdkIssuer::issue_read_url`]
    pub async fn issue(&self, request: &AccessGrantRequest) -> Result<SignedUrlResult> {
        let expiry = request.validate(self.config.default_expiry)?;
        let signed_at = self.clock.now().trunc_subsecs(0);
        let location = &request.location;

        let presigning_config = PresigningConfig::builder()
            .start_time(SystemTime::from(signed_at))
            .expires_in(expiry)
            .build()
            .map_err(PresignError::from_sdk_error)?;

        let presigned_request = match request.operation {
            Operation::Read => self
                .client
                .get_object()
                .bucket(&location.bucket)
                .key(&location.key)
                .presigned(presigning_config)
                .await
                .map_err(PresignError::from_sdk_error)?,
            Operation::Write => {
                let metadata: Option<HashMap<String, String>> = (!request.metadata.is_empty())
                    .then(|| request.metadata.clone().into_iter().collect());
                self.client
                    .put_object()
                    .bucket(&location.bucket)
                    .key(&location.key)
                    .set_content_type(request.content_type.clone())
                    .set_metadata(metadata)
                    .presigned(presigning_config)
                    .await
                    .map_err(PresignError::from_sdk_error)?
            }
        };

        let headers: BTreeMap<String, String> = presigned_request
            .headers()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect();

        let expires_at = signed_at + expiry_delta(expiry);
        debug!(
            "Issued {} URL for {} via SDK (expires in {}s)",
            request.operation,
            location,
            expiry.as_secs()
        );

        Ok(SignedUrlResult {
            url: presigned_request.uri().to_string(),
            operation: request.operation,
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            signed_at,
            expires_at,
            headers,
        })
    }
}

fn build_client(config: &Config) -> Client {
    let credentials = &config.credentials;
    let sdk_credentials = Credentials::new(
        credentials.access_key_id.clone(),
        credentials.secret_access_key().to_string(),
        credentials.session_token().map(str::to_string),
        None,
        "s3presign",
    );

    let mut builder = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(credentials.region.clone()))
        .credentials_provider(sdk_credentials)
        .force_path_style(config.force_path_style);

    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint.as_str().trim_end_matches('/'));
    }

    Client::from_conf(builder.build())
}
