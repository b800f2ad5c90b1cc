use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use super::error::{PresignError, Result};

/// Expiry used when the caller does not ask for one (15 minutes)
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// SigV4 pre-signed URLs are valid for at most 7 days
pub const MAX_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// S3 limits object keys to 1024 bytes of UTF-8
pub const MAX_KEY_LEN: usize = 1024;

/// A single object in a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Check bucket name and object key before anything gets signed
    pub fn validate(&self) -> Result<()> {
        validate_bucket_name(&self.bucket)?;
        validate_object_key(&self.key)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// What the holder of a URL is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Download the object with GET
    Read,
    /// Store the object with PUT
    Write,
}

impl Operation {
    pub fn http_method(self) -> &'static str {
        match self {
            Self::Read => "GET",
            Self::Write => "PUT",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Everything needed to issue one pre-signed URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrantRequest {
    pub location: StorageLocation,
    pub operation: Operation,
    /// Required for writes; bound into the signature
    pub content_type: Option<String>,
    /// User metadata for writes, signed as `x-amz-meta-*` headers
    pub metadata: BTreeMap<String, String>,
    /// `None` falls back to the issuer's default expiry
    pub expiry: Option<Duration>,
}

impl AccessGrantRequest {
    pub fn read(location: StorageLocation) -> Self {
        Self {
            location,
            operation: Operation::Read,
            content_type: None,
            metadata: BTreeMap::new(),
            expiry: None,
        }
    }

    pub fn write(location: StorageLocation, content_type: impl Into<String>) -> Self {
        Self {
            location,
            operation: Operation::Write,
            content_type: Some(content_type.into()),
            metadata: BTreeMap::new(),
            expiry: None,
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate the request and resolve the effective expiry
    ///
    /// # Errors
    ///
    /// Returns `PresignError::InvalidInput` for empty or malformed fields, a
    /// write without content type, metadata on a read, or an expiry outside
    /// `1s..=7 days`.
    pub fn validate(&self, default_expiry: Duration) -> Result<Duration> {
        self.location.validate()?;

        match self.operation {
            Operation::Read => {
                if self.content_type.is_some() {
                    return Err(PresignError::invalid(
                        "content type",
                        "only uploads can be bound to a content type",
                    ));
                }
                if !self.metadata.is_empty() {
                    return Err(PresignError::invalid(
                        "metadata",
                        "only uploads can carry metadata",
                    ));
                }
            }
            Operation::Write => {
                let content_type = self.content_type.as_deref().ok_or_else(|| {
                    PresignError::invalid("content type", "uploads require an explicit content type")
                })?;
                validate_content_type(content_type)?;
                let mut seen = BTreeSet::new();
                for (name, value) in &self.metadata {
                    validate_metadata(name, value)?;
                    // Names are case-insensitive on the wire
                    if !seen.insert(name.to_ascii_lowercase()) {
                        return Err(PresignError::invalid(
                            "metadata",
                            format!("'{}' is given more than once (names ignore case)", name),
                        ));
                    }
                }
            }
        }

        let expiry = self.expiry.unwrap_or(default_expiry);
        validate_expiry(expiry)?;
        Ok(expiry)
    }

    /// Headers the holder must send, as signed (lowercase names)
    pub fn signed_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if self.operation == Operation::Write {
            if let Some(content_type) = &self.content_type {
                headers.insert("content-type".to_string(), content_type.trim().to_string());
            }
            for (name, value) in &self.metadata {
                headers.insert(
                    format!("x-amz-meta-{}", name.to_ascii_lowercase()),
                    value.trim().to_string(),
                );
            }
        }
        headers
    }
}

/// A pre-signed URL and the terms it was issued under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrlResult {
    pub url: String,
    pub operation: Operation,
    pub bucket: String,
    pub key: String,
    pub signed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Headers that must accompany the request for the signature to hold
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl SignedUrlResult {
    pub fn method(&self) -> &'static str {
        self.operation.http_method()
    }
}

/// Validate S3 bucket name according to AWS rules
pub fn validate_bucket_name(bucket: &str) -> Result<()> {
    const FIELD: &str = "bucket name";

    if bucket.is_empty() {
        return Err(PresignError::invalid(FIELD, "must not be empty"));
    }

    if bucket.len() < 3 || bucket.len() > 63 {
        return Err(PresignError::invalid(
            FIELD,
            format!(
                "'{}' must be between 3 and 63 characters (got {})",
                bucket,
                bucket.len()
            ),
        ));
    }

    let is_edge_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !bucket.starts_with(is_edge_char) {
        return Err(PresignError::invalid(
            FIELD,
            format!("'{}' must start with a lowercase letter or number", bucket),
        ));
    }
    if !bucket.ends_with(is_edge_char) {
        return Err(PresignError::invalid(
            FIELD,
            format!("'{}' must end with a lowercase letter or number", bucket),
        ));
    }

    if let Some(c) = bucket
        .chars()
        .find(|&c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.')
    {
        return Err(PresignError::invalid(
            FIELD,
            format!(
                "'{}' contains invalid character '{}'. Only lowercase letters, numbers, hyphens, and periods are allowed",
                bucket, c
            ),
        ));
    }

    if bucket.contains("..") {
        return Err(PresignError::invalid(
            FIELD,
            format!("'{}' cannot contain consecutive periods", bucket),
        ));
    }

    if bucket.split('.').count() == 4 && bucket.split('.').all(|part| part.parse::<u8>().is_ok()) {
        return Err(PresignError::invalid(
            FIELD,
            format!("'{}' cannot be formatted as an IP address", bucket),
        ));
    }

    Ok(())
}

/// Object keys are opaque to S3, but must be non-empty and fit the size limit
pub fn validate_object_key(key: &str) -> Result<()> {
    const FIELD: &str = "object key";

    if key.is_empty() {
        return Err(PresignError::invalid(FIELD, "must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(PresignError::invalid(
            FIELD,
            format!("{} bytes exceeds the {} byte limit", key.len(), MAX_KEY_LEN),
        ));
    }
    if key.chars().any(char::is_control) {
        return Err(PresignError::invalid(
            FIELD,
            format!("'{}' contains control characters", key.escape_debug()),
        ));
    }
    // HTTP clients collapse these segments, which would break the signed path
    if key.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(PresignError::invalid(
            FIELD,
            format!("'{}' contains '.' or '..' path segments", key),
        ));
    }
    Ok(())
}

/// Content type has to be a parseable MIME type such as `image/png`
pub fn validate_content_type(content_type: &str) -> Result<()> {
    const FIELD: &str = "content type";

    let trimmed = content_type.trim();
    if trimmed.is_empty() {
        return Err(PresignError::invalid(FIELD, "must not be empty"));
    }
    trimmed
        .parse::<mime::Mime>()
        .map_err(|e| PresignError::invalid(FIELD, format!("'{}' is not a MIME type: {}", trimmed, e)))?;
    Ok(())
}

/// Expiry must be a whole, positive number of seconds up to [`MAX_EXPIRY`]
pub fn validate_expiry(expiry: Duration) -> Result<()> {
    if expiry.as_secs() == 0 {
        return Err(PresignError::invalid("expiry", "must be at least 1 second"));
    }
    if expiry > MAX_EXPIRY {
        return Err(PresignError::invalid(
            "expiry",
            format!(
                "{}s exceeds the maximum of {}s (7 days)",
                expiry.as_secs(),
                MAX_EXPIRY.as_secs()
            ),
        ));
    }
    Ok(())
}

fn validate_metadata(name: &str, value: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PresignError::invalid(
            "metadata",
            format!("'{}' is not a valid metadata name", name),
        ));
    }
    if value.chars().any(char::is_control) || !value.is_ascii() {
        return Err(PresignError::invalid(
            "metadata",
            format!("value for '{}' must be printable ASCII", name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_validation() {
        // Valid bucket names
        assert!(validate_bucket_name("my-bucket").is_ok());
        assert!(validate_bucket_name("my.bucket.123").is_ok());
        assert!(validate_bucket_name("abc").is_ok());
        assert!(validate_bucket_name("test-bkt").is_ok());

        // Invalid bucket names
        assert!(validate_bucket_name("ab").is_err()); // Too short
        assert!(validate_bucket_name(&"a".repeat(64)).is_err()); // Too long
        assert!(validate_bucket_name("MY-BUCKET").is_err()); // Uppercase
        assert!(validate_bucket_name("my_bucket").is_err()); // Underscore
        assert!(validate_bucket_name("-mybucket").is_err()); // Starts with dash
        assert!(validate_bucket_name("mybucket-").is_err()); // Ends with dash
        assert!(validate_bucket_name("my..bucket").is_err()); // Consecutive periods
        assert!(validate_bucket_name("192.168.1.1").is_err()); // IP address format
        assert!(validate_bucket_name("").is_err()); // Empty
    }

    #[test]
    fn test_object_key_validation() {
        assert!(validate_object_key("myimage.png").is_ok());
        assert!(validate_object_key("uploads/user-uploads/myimage-1750819242059.png").is_ok());

        let err = validate_object_key("").unwrap_err();
        assert!(err.is_input_error());
        assert!(validate_object_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(validate_object_key("bad\nkey").is_err());
        assert!(validate_object_key("uploads/../secret.txt").is_err());
        assert!(validate_object_key("my.image.png").is_ok());
    }

    #[test]
    fn test_content_type_validation() {
        assert!(validate_content_type("image/png").is_ok());
        assert!(validate_content_type("text/plain; charset=utf-8").is_ok());
        assert!(validate_content_type("").is_err());
        assert!(validate_content_type("   ").is_err());
        assert!(validate_content_type("png").is_err());
    }

    #[test]
    fn test_expiry_bounds() {
        assert!(validate_expiry(Duration::from_secs(1)).is_ok());
        assert!(validate_expiry(MAX_EXPIRY).is_ok());
        assert!(validate_expiry(Duration::ZERO).is_err());
        assert!(validate_expiry(Duration::from_millis(500)).is_err());
        assert!(validate_expiry(MAX_EXPIRY + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_request_resolves_default_expiry() {
        let request = AccessGrantRequest::read(StorageLocation::new("test-bkt", "myimage.png"));
        assert_eq!(request.validate(DEFAULT_EXPIRY).unwrap(), DEFAULT_EXPIRY);

        let request = request.with_expiry(Duration::from_secs(60));
        assert_eq!(
            request.validate(DEFAULT_EXPIRY).unwrap(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_write_requires_content_type() {
        let mut request =
            AccessGrantRequest::write(StorageLocation::new("test-bkt", "a.png"), "image/png");
        assert!(request.validate(DEFAULT_EXPIRY).is_ok());

        request.content_type = None;
        let err = request.validate(DEFAULT_EXPIRY).unwrap_err();
        assert!(matches!(
            err,
            PresignError::InvalidInput {
                field: "content type",
                ..
            }
        ));
    }

    #[test]
    fn test_read_rejects_upload_only_fields() {
        let mut request = AccessGrantRequest::read(StorageLocation::new("test-bkt", "a.png"));
        request.metadata.insert("author".into(), "john".into());
        assert!(request.validate(DEFAULT_EXPIRY).is_err());
    }

    #[test]
    fn test_signed_headers_for_write() {
        let mut metadata = BTreeMap::new();
        metadata.insert("Author".to_string(), "John".to_string());
        let request =
            AccessGrantRequest::write(StorageLocation::new("test-bkt", "a.png"), "image/png")
                .with_metadata(metadata);

        let headers = request.signed_headers();
        assert_eq!(headers.get("content-type").map(String::as_str), Some("image/png"));
        assert_eq!(headers.get("x-amz-meta-author").map(String::as_str), Some("John"));
        assert!(AccessGrantRequest::read(StorageLocation::new("test-bkt", "a.png"))
            .signed_headers()
            .is_empty());
    }

    #[test]
    fn test_metadata_names_differing_in_case_are_rejected() {
        let mut metadata = BTreeMap::new();
        metadata.insert("Author".to_string(), "a".to_string());
        metadata.insert("author".to_string(), "b".to_string());
        let request = AccessGrantRequest::write(StorageLocation::new("test-bkt", "a.png"), "image/png")
            .with_metadata(metadata);

        let err = request.validate(DEFAULT_EXPIRY).unwrap_err();
        assert!(matches!(err, PresignError::InvalidInput { field: "metadata", .. }));
    }

    #[test]
    fn test_invalid_metadata_name() {
        let mut metadata = BTreeMap::new();
        metadata.insert("bad name".to_string(), "x".to_string());
        let request =
            AccessGrantRequest::write(StorageLocation::new("test-bkt", "a.png"), "image/png")
                .with_metadata(metadata);
        assert!(request.validate(DEFAULT_EXPIRY).is_err());
    }
}
