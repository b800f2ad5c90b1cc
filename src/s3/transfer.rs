use futures::{StreamExt, TryStreamExt};
use indicatif::ProgressBar;
use reqwest::{header::CONTENT_LENGTH, Body, Client, Response};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::error::{PresignError, Result};
use super::grant::{Operation, SignedUrlResult};

/// Upload a file through a pre-signed PUT URL with progress bar
///
/// Sends every header the URL was signed with (Content-Type included), so the
/// store accepts the upload as long as the URL has not expired.
pub async fn upload_with_url(
    client: &Client,
    grant: &SignedUrlResult,
    local_path: &Path,
    pb: Option<&ProgressBar>,
) -> Result<u64> {
    if grant.operation != Operation::Write {
        return Err(PresignError::invalid(
            "operation",
            "uploads need a URL issued for writing",
        ));
    }

    let file = File::open(local_path).await?;
    let file_size = file.metadata().await?.len();

    if let Some(pb) = pb {
        pb.set_length(file_size);
        pb.set_message(format!("Uploading {}", local_path.display()));
    }

    let progress = pb.cloned();
    let stream = ReaderStream::new(file).inspect_ok(move |chunk| {
        if let Some(pb) = &progress {
            pb.inc(chunk.len() as u64);
        }
    });

    let mut request = client
        .put(&grant.url)
        .header(CONTENT_LENGTH, file_size)
        .body(Body::wrap_stream(stream));
    for (name, value) in &grant.headers {
        request = request.header(name, value);
    }

    let response = request.send().await?;
    ensure_success(response).await?;

    if let Some(pb) = pb {
        pb.finish_with_message(format!("Uploaded {}", local_path.display()));
    }
    info!("Uploaded {} bytes to s3://{}/{}", file_size, grant.bucket, grant.key);

    Ok(file_size)
}

/// Download an object through a pre-signed GET URL into `dest`
pub async fn download_with_url(
    client: &Client,
    grant: &SignedUrlResult,
    dest: &Path,
    pb: Option<&ProgressBar>,
) -> Result<u64> {
    if grant.operation != Operation::Read {
        return Err(PresignError::invalid(
            "operation",
            "downloads need a URL issued for reading",
        ));
    }

    let response = ensure_success(client.get(&grant.url).send().await?).await?;

    if let Some(pb) = pb {
        if let Some(len) = response.content_length() {
            pb.set_length(len);
        }
        pb.set_message(format!("Downloading {}", grant.key));
    }

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        if let Some(pb) = pb {
            pb.inc(chunk.len() as u64);
        }
    }
    file.flush().await?;

    if let Some(pb) = pb {
        pb.finish_with_message(format!("Downloaded {}", dest.display()));
    }
    debug!("Downloaded {} bytes to {}", written, dest.display());

    Ok(written)
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(PresignError::UnexpectedStatus {
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientCredentials, Config};
    use crate::s3::grant::StorageLocation;
    use crate::s3::issuer::UrlIssuer;
    use crate::s3::verify::{IncomingRequest, StoreVerifier};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Accepts a request only if its pre-signed signature holds
    struct VerifyingStore {
        verifier: StoreVerifier,
        body: Vec<u8>,
        received: Arc<Mutex<Vec<u8>>>,
    }

    impl Respond for VerifyingStore {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let headers = request.headers.iter().filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            });
            let incoming =
                IncomingRequest::new(request.method.as_str(), request.url.as_str()).with_headers(headers);

            match self.verifier.verify(&incoming, Utc::now()) {
                Ok(()) => {
                    if let Ok(mut received) = self.received.lock() {
                        received.extend_from_slice(&request.body);
                    }
                    ResponseTemplate::new(200).set_body_bytes(self.body.clone())
                }
                Err(e) => ResponseTemplate::new(403).set_body_string(e.to_string()),
            }
        }
    }

    fn config(endpoint: &str) -> Arc<Config> {
        let credentials = ClientCredentials::new("us-east-1", "minioadmin", "minioadmin-secret");
        Arc::new(
            Config::new(credentials)
                .unwrap()
                .with_endpoint(endpoint)
                .unwrap()
                .with_path_style(true),
        )
    }

    async fn store(body: &[u8]) -> (MockServer, Arc<Config>, Arc<Mutex<Vec<u8>>>) {
        let server = MockServer::start().await;
        let config = config(&server.uri());
        let received = Arc::new(Mutex::new(Vec::new()));
        Mock::given(wiremock::matchers::any())
            .respond_with(VerifyingStore {
                verifier: StoreVerifier::new(config.clone()),
                body: body.to_vec(),
                received: received.clone(),
            })
            .mount(&server)
            .await;
        (server, config, received)
    }

    #[tokio::test]
    async fn test_upload_with_matching_content_type() {
        let (_server, config, received) = store(b"").await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("myimage.png");
        tokio::fs::write(&path, b"fake png bytes").await.unwrap();

        let grant = UrlIssuer::new(config)
            .issue_write_url(
                StorageLocation::new("test-bkt", "uploads/user-uploads/myimage.png"),
                "image/png",
                None,
            )
            .unwrap();

        let size = upload_with_url(&Client::new(), &grant, &path, None)
            .await
            .unwrap();
        assert_eq!(size, 14);
        assert_eq!(received.lock().unwrap().as_slice(), b"fake png bytes");
    }

    #[tokio::test]
    async fn test_upload_with_other_content_type_is_refused() {
        let (_server, config, received) = store(b"").await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        tokio::fs::write(&path, b"<html></html>").await.unwrap();

        let mut grant = UrlIssuer::new(config)
            .issue_write_url(
                StorageLocation::new("test-bkt", "uploads/page.html"),
                "image/png",
                None,
            )
            .unwrap();
        grant
            .headers
            .insert("content-type".to_string(), "text/html".to_string());

        let err = upload_with_url(&Client::new(), &grant, &path, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PresignError::UnexpectedStatus { status: 403, .. }));
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download() {
        let (_server, config, _) = store(b"object bytes").await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        let grant = UrlIssuer::new(config)
            .issue_read_url(StorageLocation::new("test-bkt", "myimage.png"), None)
            .unwrap();
        let pb = ProgressBar::hidden();

        let written = download_with_url(&Client::new(), &grant, &dest, Some(&pb))
            .await
            .unwrap();
        assert_eq!(written, 12);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"object bytes");
    }

    #[tokio::test]
    async fn test_operation_must_match() {
        let (_server, config, _) = store(b"").await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        tokio::fs::write(&path, b"x").await.unwrap();

        let read_grant = UrlIssuer::new(config)
            .issue_read_url(StorageLocation::new("test-bkt", "a.png"), None)
            .unwrap();
        let err = upload_with_url(&Client::new(), &read_grant, &path, None)
            .await
            .unwrap_err();
        assert!(err.is_input_error());
    }
}
