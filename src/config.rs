use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::s3::error::{PresignError, Result};
use crate::s3::grant::{self, StorageLocation, DEFAULT_EXPIRY};

/// Static credentials used to sign URLs
///
/// The secret key and session token never show up in `Debug` output or in
/// any issued URL; only the access key id does (inside `X-Amz-Credential`).
pub struct ClientCredentials {
    pub(crate) region: String,
    pub(crate) access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
}

impl ClientCredentials {
    pub fn new(
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::new(secret_access_key.into()),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(SecretString::new(token.into()));
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub(crate) fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    pub(crate) fn session_token(&self) -> Option<&str> {
        self.session_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    fn validate(&self, custom_endpoint: bool) -> Result<()> {
        Config::validate_region(&self.region, custom_endpoint)?;

        if self.access_key_id.trim().is_empty() {
            return Err(PresignError::config("AWS_ACCESS_KEY_ID cannot be empty"));
        }
        if self.access_key_id.contains(['/', ' ']) {
            return Err(PresignError::config(
                "AWS_ACCESS_KEY_ID must not contain '/' or spaces",
            ));
        }
        if self.secret_access_key().is_empty() {
            return Err(PresignError::config("AWS_SECRET_ACCESS_KEY cannot be empty"));
        }

        Ok(())
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Configuration for issuing pre-signed URLs
///
/// Only [`Config::new`], [`Config::from_env`] and [`Config::from_lookup`]
/// produce one, so every issuer holds validated credentials:
///
/// ```compile_fail
/// use s3presign::{ClientCredentials, Config};
///
/// let config = Config {
///     credentials: ClientCredentials::new("", "", "secret"),
///     endpoint: None,
///     force_path_style: false,
///     bucket: None,
///     target_path: String::new(),
///     default_expiry: std::time::Duration::from_secs(900),
/// };
/// ```
#[derive(Debug)]
pub struct Config {
    pub(crate) credentials: ClientCredentials,
    /// Custom S3-compatible endpoint (MinIO, LocalStack, R2); AWS when `None`
    pub(crate) endpoint: Option<Url>,
    pub(crate) force_path_style: bool,
    /// Bucket used by the CLI when none is given on the command line
    pub(crate) bucket: Option<String>,
    pub(crate) target_path: String,
    pub(crate) default_expiry: Duration,
}

impl Config {
    /// Build a validated configuration from credentials alone (AWS endpoint,
    /// virtual-hosted addressing, 15 minute default expiry)
    ///
    /// # Errors
    ///
    /// Returns `PresignError::Configuration` if region or keys are missing or invalid
    pub fn new(credentials: ClientCredentials) -> Result<Self> {
        credentials.validate(false)?;
        Ok(Self {
            credentials,
            endpoint: None,
            force_path_style: false,
            bucket: None,
            target_path: String::new(),
            default_expiry: DEFAULT_EXPIRY,
        })
    }

    /// Point at an S3-compatible endpoint instead of AWS
    ///
    /// # Errors
    ///
    /// Returns `PresignError::Configuration` if the endpoint is not an http(s) URL
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        self.endpoint = Some(Self::parse_endpoint(endpoint)?);
        Ok(self)
    }

    pub fn with_path_style(mut self, force_path_style: bool) -> Self {
        self.force_path_style = force_path_style;
        self
    }

    /// # Errors
    ///
    /// Returns `PresignError::Configuration` if the expiry is out of range
    pub fn with_default_expiry(mut self, expiry: Duration) -> Result<Self> {
        grant::validate_expiry(expiry)
            .map_err(|e| PresignError::config(format!("default expiry: {}", e)))?;
        self.default_expiry = expiry;
        Ok(self)
    }

    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn force_path_style(&self) -> bool {
        self.force_path_style
    }

    /// Prefix for keys built by [`Config::build_key`]
    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    /// Expiry applied when a request does not carry one
    pub fn default_expiry(&self) -> Duration {
        self.default_expiry
    }

    /// Load configuration from environment variables and .env file
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns `PresignError::Configuration` if a required value is missing or invalid
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| names.iter().find_map(|name| lookup(*name));

        let region = lookup("AWS_REGION").ok_or_else(|| {
            PresignError::config("AWS_REGION not found in environment. Please set it in .env file")
        })?;

        let access_key_id = first(&["AWS_ACCESS_KEY_ID", "ACCESS_KEY_ID"]).ok_or_else(|| {
            PresignError::config(
                "AWS_ACCESS_KEY_ID not found in environment. Please set it in .env file",
            )
        })?;

        // Older .env files spell it SECRET__ACCESS_KEY
        let secret_access_key = first(&[
            "AWS_SECRET_ACCESS_KEY",
            "SECRET_ACCESS_KEY",
            "SECRET__ACCESS_KEY",
        ])
        .ok_or_else(|| {
            PresignError::config(
                "AWS_SECRET_ACCESS_KEY not found in environment. Please set it in .env file",
            )
        })?;

        let mut credentials = ClientCredentials::new(region, access_key_id, secret_access_key);
        if let Some(token) = lookup("AWS_SESSION_TOKEN").filter(|t| !t.is_empty()) {
            credentials = credentials.with_session_token(token);
        }

        let endpoint = lookup("S3_ENDPOINT")
            .filter(|e| !e.is_empty())
            .map(|e| Self::parse_endpoint(&e))
            .transpose()?;
        credentials.validate(endpoint.is_some())?;

        let force_path_style = match lookup("S3_FORCE_PATH_STYLE") {
            Some(v) => Self::parse_bool("S3_FORCE_PATH_STYLE", &v)?,
            None => false,
        };

        let bucket = lookup("S3_BUCKET").filter(|b| !b.is_empty());
        if let Some(bucket) = &bucket {
            grant::validate_bucket_name(bucket)
                .map_err(|e| PresignError::config(format!("S3_BUCKET: {}", e)))?;
        }

        let target_path = lookup("S3_TARGET_PATH").unwrap_or_default();
        Self::validate_target_path(&target_path)?;

        let default_expiry = match lookup("PRESIGN_DEFAULT_EXPIRY_SECS") {
            Some(v) => {
                let secs = v.trim().parse::<u64>().map_err(|_| {
                    PresignError::config(format!(
                        "PRESIGN_DEFAULT_EXPIRY_SECS '{}' is not a number of seconds",
                        v
                    ))
                })?;
                let expiry = Duration::from_secs(secs);
                grant::validate_expiry(expiry).map_err(|e| {
                    PresignError::config(format!("PRESIGN_DEFAULT_EXPIRY_SECS: {}", e))
                })?;
                expiry
            }
            None => DEFAULT_EXPIRY,
        };

        Ok(Self {
            credentials,
            endpoint,
            force_path_style,
            bucket,
            target_path,
            default_expiry,
        })
    }

    /// Validate AWS region format
    fn validate_region(region: &str, custom_endpoint: bool) -> Result<()> {
        if region.is_empty() {
            return Err(PresignError::config("AWS_REGION cannot be empty"));
        }

        if !region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(PresignError::config(format!(
                "AWS_REGION '{}' may only contain lowercase letters, digits and '-'",
                region
            )));
        }

        // S3-compatible stores accept names like "auto" or "minio"
        if !custom_endpoint && !region.contains('-') {
            return Err(PresignError::config(format!(
                "AWS_REGION '{}' doesn't look like a valid region (e.g., us-west-2, eu-west-1)",
                region
            )));
        }

        Ok(())
    }

    fn parse_endpoint(endpoint: &str) -> Result<Url> {
        let url = Url::parse(endpoint).map_err(|e| {
            PresignError::config(format!("S3_ENDPOINT '{}' is not a valid URL: {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(PresignError::config(format!(
                "S3_ENDPOINT '{}' must use http or https",
                endpoint
            )));
        }
        if url.host_str().is_none() {
            return Err(PresignError::config(format!(
                "S3_ENDPOINT '{}' has no host",
                endpoint
            )));
        }
        if url.query().is_some() || url.path().trim_matches('/') != "" {
            return Err(PresignError::config(format!(
                "S3_ENDPOINT '{}' must not carry a path or query",
                endpoint
            )));
        }

        Ok(url)
    }

    fn parse_bool(name: &str, value: &str) -> Result<bool> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => Err(PresignError::config(format!(
                "{} '{}' is not a boolean (use true or false)",
                name, other
            ))),
        }
    }

    /// Validate S3 target path
    fn validate_target_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }

        if path.contains("//") {
            return Err(PresignError::config(format!(
                "S3_TARGET_PATH '{}' contains consecutive slashes (not allowed)",
                path
            )));
        }

        if path.split('/').any(|segment| segment == "..") {
            return Err(PresignError::config(format!(
                "S3_TARGET_PATH '{}' contains '..' (not allowed for security)",
                path
            )));
        }

        if path.starts_with('/') {
            return Err(PresignError::config(format!(
                "S3_TARGET_PATH '{}' should not start with '/' (use relative path)",
                path
            )));
        }

        Ok(())
    }

    /// Construct an object key from a relative path
    ///
    /// # Arguments
    ///
    /// * `relative_path` - The relative path of the object (or bare file name)
    ///
    /// # Returns
    ///
    /// The complete S3 object key including the target path prefix
    pub fn build_key(&self, relative_path: &str) -> String {
        let path = relative_path.trim_start_matches("./");
        if self.target_path.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.target_path.trim_end_matches('/'), path)
        }
    }

    /// Resolve the bucket for a request, falling back to `S3_BUCKET`
    ///
    /// # Errors
    ///
    /// Returns `PresignError::InvalidInput` when neither is set
    pub fn resolve_bucket(&self, bucket: Option<&str>) -> Result<String> {
        bucket
            .map(str::to_string)
            .or_else(|| self.bucket.clone())
            .ok_or_else(|| {
                PresignError::invalid("bucket name", "pass --bucket or set S3_BUCKET in .env")
            })
    }

    /// Host and scheme to use for an object, with the path-style flag applied
    pub(crate) fn object_host(&self, location: &StorageLocation) -> ObjectHost {
        // Dotted bucket names break TLS wildcard certificates in virtual-hosted style
        let path_style = self.force_path_style || location.bucket.contains('.');

        let (scheme, host) = match &self.endpoint {
            Some(endpoint) => {
                let host = endpoint.host_str().unwrap_or_default();
                let host = match endpoint.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                (endpoint.scheme().to_string(), host)
            }
            None => (
                "https".to_string(),
                format!("s3.{}.amazonaws.com", self.credentials.region),
            ),
        };

        if path_style {
            ObjectHost {
                scheme,
                host,
                bucket_in_path: true,
            }
        } else {
            ObjectHost {
                scheme,
                host: format!("{}.{}", location.bucket, host),
                bucket_in_path: false,
            }
        }
    }
}

/// Where an object lives on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ObjectHost {
    pub scheme: String,
    /// Host header value, including a non-default port
    pub host: String,
    pub bucket_in_path: bool,
}
