use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

use s3presign::config::Config;
use s3presign::s3::{
    detect_content_type, download_with_url, parse_metadata, unique_upload_key, upload_with_url,
    AccessGrantRequest, Clock, FixedClock, IncomingRequest, PresignError, SdkIssuer,
    SignedUrlResult, StorageLocation, StoreVerifier, SystemClock, UrlIssuer,
};

#[derive(Parser, Debug)]
#[command(
    name = "s3presign",
    version = env!("CARGO_PKG_VERSION"),
    author = "Tyr Chen <tyr.chen@gmail.com>",
    about = "Issue time-limited pre-signed S3 URLs for downloads and uploads",
    long_about = "Generates pre-signed GET and PUT URLs locally from static credentials. \
                  Upload URLs are bound to a Content-Type, so the store rejects uploads of anything else. \
                  URLs expire after 15 minutes unless --expires-in says otherwise (max 7 days).",
    after_help = "Examples:\n  \
                  s3presign get myimage.png -b my-bucket              # Download URL (15 min)\n  \
                  s3presign get report.pdf -x 3600 --download ./r.pdf # Issue and download\n  \
                  s3presign put ./myimage.png --unique -x 3600        # Upload URL for uploads/..-<ts>.png\n  \
                  s3presign put ./myimage.png --upload                # Issue and upload\n  \
                  s3presign batch ./photos -e png,jpg --operation put # URLs for a whole directory\n  \
                  s3presign verify '<url>' -m PUT -H 'Content-Type: image/png'\n\n\
                  Configuration (.env):\n  \
                  AWS_REGION=ap-south-1\n  \
                  AWS_ACCESS_KEY_ID=...\n  \
                  AWS_SECRET_ACCESS_KEY=...\n  \
                  S3_BUCKET=my-bucket                 # optional default bucket\n  \
                  S3_TARGET_PATH=uploads/user-uploads # optional upload prefix\n  \
                  S3_ENDPOINT=http://localhost:9000   # optional, for MinIO/LocalStack"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Signing backend
    #[arg(long, value_enum, default_value_t = Backend::Sdk, global = true)]
    backend: Backend,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Sign as of this instant (RFC 3339, e.g. 2025-06-25T00:00:00Z) instead of now
    #[arg(long, global = true)]
    at: Option<DateTime<Utc>>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a download (GET) URL
    Get {
        /// Object key
        key: String,

        /// Bucket (defaults to S3_BUCKET)
        #[arg(long, short = 'b')]
        bucket: Option<String>,

        /// URL lifetime in seconds (default 900, max 604800)
        #[arg(long, short = 'x')]
        expires_in: Option<u64>,

        /// Download the object to this path with the issued URL
        #[arg(long)]
        download: Option<PathBuf>,
    },

    /// Issue an upload (PUT) URL bound to a content type
    Put {
        /// Local file (or file name) to upload
        file: PathBuf,

        /// Bucket (defaults to S3_BUCKET)
        #[arg(long, short = 'b')]
        bucket: Option<String>,

        /// Content-Type the upload must carry (detected from the extension by default)
        #[arg(long, short = 't')]
        content_type: Option<String>,

        /// Exact object key (defaults to S3_TARGET_PATH/<file name>)
        #[arg(long, short = 'k', conflicts_with = "unique")]
        key: Option<String>,

        /// Append a millisecond timestamp to the key to avoid collisions
        #[arg(long)]
        unique: bool,

        /// Metadata bound to the upload (key=value pairs, comma-separated)
        #[arg(long)]
        metadata: Option<String>,

        /// URL lifetime in seconds (default 900, max 604800)
        #[arg(long, short = 'x')]
        expires_in: Option<u64>,

        /// Upload the file with the issued URL
        #[arg(long)]
        upload: bool,
    },

    /// Issue URLs for every matching file under a directory
    Batch {
        /// File or directory
        path: PathBuf,

        /// Allowed file extensions (comma-separated, e.g., "png,jpg")
        #[arg(long, short = 'e', default_value = "png,jpg,jpeg", value_delimiter = ',')]
        extensions: Vec<String>,

        /// Issue download or upload URLs
        #[arg(long, value_enum, default_value_t = BatchOperation::Put)]
        operation: BatchOperation,

        /// Bucket (defaults to S3_BUCKET)
        #[arg(long, short = 'b')]
        bucket: Option<String>,

        /// URL lifetime in seconds (default 900, max 604800)
        #[arg(long, short = 'x')]
        expires_in: Option<u64>,
    },

    /// Check a pre-signed URL the way the store would
    Verify {
        /// Pre-signed URL
        url: String,

        /// HTTP method of the request
        #[arg(long, short = 'm', default_value = "GET")]
        method: String,

        /// Request header ("Name: value"), repeatable
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    /// AWS SDK presigner
    Sdk,
    /// Synchronous SigV4 signer, parallel across batches
    Native,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BatchOperation {
    Get,
    Put,
}

/// The configured signing backend
enum Issuer {
    Native(UrlIssuer),
    Sdk(SdkIssuer),
}

impl Issuer {
    fn new(backend: Backend, config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        match backend {
            Backend::Native => Self::Native(UrlIssuer::with_clock(config, clock)),
            Backend::Sdk => Self::Sdk(SdkIssuer::with_clock(config, clock)),
        }
    }

    async fn issue(&self, request: &AccessGrantRequest) -> s3presign::s3::Result<SignedUrlResult> {
        match self {
            Self::Native(issuer) => issuer.issue(request),
            Self::Sdk(issuer) => issuer.issue(request).await,
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    // Initialize tracing/logging with support for LOG_LEVEL from .env
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<PresignError>() {
            Some(presign_error) => {
                eprintln!("{} {}", style("✗").red(), presign_error.user_message())
            }
            None => eprintln!("{} {:#}", style("✗").red(), e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("s3presign v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::from_env()?);
    let clock: Arc<dyn Clock> = match cli.at {
        Some(at) => Arc::new(FixedClock(at)),
        None => Arc::new(SystemClock),
    };

    match cli.command {
        Command::Get {
            key,
            bucket,
            expires_in,
            download,
        } => {
            let issuer = Issuer::new(cli.backend, config.clone(), clock);
            let bucket = config.resolve_bucket(bucket.as_deref())?;
            let mut request = AccessGrantRequest::read(StorageLocation::new(bucket, key));
            request.expiry = expires_in.map(Duration::from_secs);

            let grant = issuer.issue(&request).await?;
            print_grant(&grant, cli.format)?;

            if let Some(dest) = download {
                let pb = transfer_progress_bar();
                let written =
                    download_with_url(&reqwest::Client::new(), &grant, &dest, Some(&pb)).await?;
                pb.finish_and_clear();
                eprintln!(
                    "{} Downloaded {} to {}",
                    style("✓").green(),
                    format_size(written),
                    dest.display()
                );
            }
        }
        Command::Put {
            file,
            bucket,
            content_type,
            key,
            unique,
            metadata,
            expires_in,
            upload,
        } => {
            let issuer = Issuer::new(cli.backend, config.clone(), clock.clone());
            let bucket = config.resolve_bucket(bucket.as_deref())?;
            let filename = file
                .file_name()
                .context("Failed to get filename")?
                .to_string_lossy()
                .to_string();

            let key = match key {
                Some(key) => key,
                None if unique => unique_upload_key(config.target_path(), &filename, clock.now()),
                None => config.build_key(&filename),
            };
            let content_type = content_type.unwrap_or_else(|| detect_content_type(&file));

            let mut request =
                AccessGrantRequest::write(StorageLocation::new(bucket, key), content_type);
            request.expiry = expires_in.map(Duration::from_secs);
            if let Some(metadata) = metadata {
                request.metadata = parse_metadata(&metadata)?;
            }

            let grant = issuer.issue(&request).await?;
            print_grant(&grant, cli.format)?;

            if upload {
                let pb = transfer_progress_bar();
                let size = upload_with_url(&reqwest::Client::new(), &grant, &file, Some(&pb))
                    .await
                    .with_context(|| format!("Failed to upload {}", file.display()))?;
                pb.finish_and_clear();
                eprintln!(
                    "{} Uploaded {} to s3://{}/{}",
                    style("✓").green(),
                    format_size(size),
                    grant.bucket,
                    grant.key
                );
            }
        }
        Command::Batch {
            path,
            extensions,
            operation,
            bucket,
            expires_in,
        } => {
            let bucket = config.resolve_bucket(bucket.as_deref())?;
            let files = collect_files(&path, &extensions)?;
            if files.is_empty() {
                println!(
                    "{}",
                    style(format!(
                        "No files found with extensions: {}",
                        extensions.join(", ")
                    ))
                    .yellow()
                );
                return Ok(());
            }

            let requests = files
                .iter()
                .map(|file| -> Result<AccessGrantRequest> {
                    let relative_path = get_relative_path(&path, file)?;
                    let location = StorageLocation::new(&bucket, config.build_key(&relative_path));
                    let mut request = match operation {
                        BatchOperation::Get => AccessGrantRequest::read(location),
                        BatchOperation::Put => {
                            AccessGrantRequest::write(location, detect_content_type(file))
                        }
                    };
                    request.expiry = expires_in.map(Duration::from_secs);
                    Ok(request)
                })
                .collect::<Result<Vec<_>>>()?;
            info!("Issuing {} URL(s) for {}", requests.len(), path.display());

            let results = issue_batch(cli.backend, config.clone(), clock, &requests).await;
            print_batch(&requests, results, cli.format)?;
        }
        Command::Verify {
            url,
            method,
            headers,
        } => {
            let mut request = IncomingRequest::new(method.to_ascii_uppercase(), url);
            for header in &headers {
                let (name, value) = header
                    .split_once(':')
                    .with_context(|| format!("Header '{}' must look like 'Name: value'", header))?;
                request = request.header(name.trim(), value.trim());
            }

            let now = cli.at.unwrap_or_else(Utc::now);
            match StoreVerifier::new(config).verify(&request, now) {
                Ok(()) => println!(
                    "{} {} request would be accepted",
                    style("✓").green(),
                    request.method
                ),
                Err(e) => anyhow::bail!("{} request would be rejected: {}", request.method, e),
            }
        }
    }

    Ok(())
}

/// Issue many URLs at once
///
/// The native signer is CPU-only and runs on the rayon pool; the SDK presigner
/// is async and runs concurrently on the tokio runtime.
async fn issue_batch(
    backend: Backend,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    requests: &[AccessGrantRequest],
) -> Vec<s3presign::s3::Result<SignedUrlResult>> {
    match Issuer::new(backend, config, clock) {
        Issuer::Native(issuer) => requests
            .par_iter()
            .map(|request| issuer.issue(request))
            .collect(),
        Issuer::Sdk(issuer) => {
            futures::future::join_all(requests.iter().map(|request| issuer.issue(request))).await
        }
    }
}

fn print_grant(grant: &SignedUrlResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(grant)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(grant)?),
        OutputFormat::Text => {
            println!(
                "{} {} s3://{}/{}",
                style("✓").green(),
                style(grant.method()).bold(),
                grant.bucket,
                grant.key
            );
            println!("  {} {}", style("🔗").blue(), grant.url);
            println!(
                "  {}",
                style(format!(
                    "Expires at {} ({}s)",
                    grant.expires_at.to_rfc3339(),
                    (grant.expires_at - grant.signed_at).num_seconds()
                ))
                .dim()
            );
            for (name, value) in &grant.headers {
                println!(
                    "  {}",
                    style(format!("Required header: {}: {}", name, value)).dim()
                );
            }
        }
    }
    Ok(())
}

fn print_batch(
    requests: &[AccessGrantRequest],
    results: Vec<s3presign::s3::Result<SignedUrlResult>>,
    format: OutputFormat,
) -> Result<()> {
    let mut issued = Vec::new();
    let mut failed = 0usize;

    for (request, result) in requests.iter().zip(results) {
        match result {
            Ok(grant) => issued.push(grant),
            Err(e) => {
                warn!("Failed to issue URL for {}: {}", request.location, e);
                failed += 1;
                if format == OutputFormat::Text {
                    println!(
                        "{} {} - {}",
                        style("✗").red(),
                        style(&request.location).red(),
                        style(e).red()
                    );
                }
            }
        }
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&issued)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&issued)?),
        OutputFormat::Text => {
            for grant in &issued {
                print_grant(grant, format)?;
            }
            println!();
            println!(
                "{}",
                style(format!(
                    "Summary: {} URL(s) issued, {} failed",
                    issued.len(),
                    failed
                ))
                .bold()
            );
        }
    }

    Ok(())
}

fn transfer_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
    {
        pb.set_style(bar_style.progress_chars("#>-"));
    }
    pb
}

/// Collect all files to process from the given path, filtered by extensions
fn collect_files(path: &Path, allowed_extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    // Normalize extensions to lowercase for case-insensitive matching
    let extensions: Vec<String> = allowed_extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .collect();

    let matches = |p: &Path| {
        p.extension()
            .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    };

    if path.is_file() {
        if matches(path) {
            files.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        for entry in WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if matches(entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }
    } else {
        anyhow::bail!("Path does not exist: {}", path.display());
    }

    files.sort();
    Ok(files)
}

/// Get relative path for key construction, with `/` separators
fn get_relative_path(base: &Path, file: &Path) -> Result<String> {
    let relative = if base.is_file() {
        PathBuf::from(file.file_name().context("Failed to get filename")?)
    } else {
        file.strip_prefix(base)
            .context("Failed to strip prefix")?
            .to_path_buf()
    };

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Format file size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_put_command() {
        let cli = Cli::try_parse_from([
            "s3presign",
            "put",
            "./myimage.png",
            "--unique",
            "-x",
            "3600",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Put {
                unique, expires_in, ..
            } => {
                assert!(unique);
                assert_eq!(expires_in, Some(3600));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_sdk_is_the_default_backend() {
        let cli = Cli::try_parse_from(["s3presign", "get", "myimage.png"]).unwrap();
        assert_eq!(cli.backend, Backend::Sdk);

        let cli =
            Cli::try_parse_from(["s3presign", "get", "myimage.png", "--backend", "native"]).unwrap();
        assert_eq!(cli.backend, Backend::Native);
    }

    #[test]
    fn test_parse_fixed_signing_time() {
        let cli = Cli::try_parse_from([
            "s3presign",
            "--at",
            "2025-06-25T02:40:00Z",
            "get",
            "myimage.png",
        ])
        .unwrap();
        assert_eq!(
            cli.at.map(|t| t.to_rfc3339()),
            Some("2025-06-25T02:40:00+00:00".to_string())
        );
    }

    #[test]
    fn test_key_and_unique_conflict() {
        assert!(Cli::try_parse_from([
            "s3presign",
            "put",
            "a.png",
            "--key",
            "x.png",
            "--unique"
        ])
        .is_err());
    }

    #[test]
    fn test_collect_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.TXT"), b"x").unwrap();
        std::fs::write(dir.path().join("nested/c.JPG"), b"x").unwrap();

        let files = collect_files(dir.path(), &["png".to_string(), ".jpg".to_string()]).unwrap();
        assert_eq!(files.len(), 2);

        let relative: Vec<String> = files
            .iter()
            .map(|f| get_relative_path(dir.path(), f).unwrap())
            .collect();
        assert_eq!(relative, vec!["a.png".to_string(), "nested/c.JPG".to_string()]);

        assert!(collect_files(&dir.path().join("missing"), &[]).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
