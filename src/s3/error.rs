use thiserror::Error;

/// Errors that can occur while issuing or using pre-signed URLs
#[derive(Error, Debug)]
pub enum PresignError {
    /// Missing or invalid credentials, region or endpoint
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller supplied an empty or malformed bucket, key, content type or expiry
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The SDK presigner rejected the request
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Network-related error while using an issued URL
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered a transfer with a non-success status
    #[error("Unexpected status {status} from store: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PresignError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a signing error from an AWS SDK error
    pub fn from_sdk_error<E: std::fmt::Display>(error: E) -> Self {
        Self::Signing(error.to_string())
    }

    /// Whether the caller has to fix its input before trying again
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(message) => {
                format!(
                    "Configuration error: {}\n\nPossible solutions:\n  \
                     1. Set AWS_REGION, AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY in .env\n  \
                     2. Check the region looks like us-west-2 or ap-south-1\n  \
                     3. Verify S3_ENDPOINT is a full URL (e.g., http://localhost:9000)",
                    message
                )
            }
            Self::InvalidInput { field, reason } => {
                format!(
                    "Invalid {}: {}\n\nPossible solutions:\n  \
                     1. Bucket names are 3-63 lowercase letters, digits, '-' or '.'\n  \
                     2. Object keys must be non-empty (max 1024 bytes)\n  \
                     3. Uploads need an explicit MIME type (e.g., image/png)\n  \
                     4. Expiry must be between 1 second and 7 days",
                    field, reason
                )
            }
            Self::UnexpectedStatus { status, body } if *status == 403 => {
                format!(
                    "Access denied by the store (403): {}\n\nPossible solutions:\n  \
                     1. The URL may have expired, issue a new one\n  \
                     2. Send exactly the Content-Type the URL was issued for\n  \
                     3. Check the IAM user behind the access key can reach the bucket",
                    body
                )
            }
            Self::Http(e) => {
                format!(
                    "Network error: {}\n\nPossible solutions:\n  \
                     1. Check your internet connection\n  \
                     2. Verify AWS_REGION or S3_ENDPOINT is correct in .env\n  \
                     3. Check if you're behind a proxy/firewall",
                    e
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for pre-signed URL operations
pub type Result<T> = std::result::Result<T, PresignError>;
