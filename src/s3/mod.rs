pub mod client;
pub mod clock;
pub mod error;
pub mod grant;
pub mod helpers;
pub mod issuer;
pub mod sigv4;
pub mod transfer;
pub mod verify;

pub use client::SdkIssuer;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{PresignError, Result};
pub use grant::{
    AccessGrantRequest, Operation, SignedUrlResult, StorageLocation, DEFAULT_EXPIRY, MAX_EXPIRY,
};
pub use helpers::{detect_content_type, parse_metadata, unique_upload_key};
pub use issuer::UrlIssuer;
pub use transfer::{download_with_url, upload_with_url};
pub use verify::{IncomingRequest, StoreVerifier, VerifyError};
