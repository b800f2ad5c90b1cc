//! Issue time-limited, pre-signed S3 URLs.
//!
//! [`UrlIssuer`] signs GET and PUT URLs locally with AWS Signature Version 4;
//! [`SdkIssuer`] does the same through the AWS SDK presigner. Both take an
//! immutable [`Config`] and never contact the store while signing.

pub mod config;
pub mod s3;

pub use config::{ClientCredentials, Config};
pub use s3::{
    AccessGrantRequest, Operation, PresignError, SdkIssuer, SignedUrlResult, StorageLocation,
    StoreVerifier, UrlIssuer,
};
