//! Upload a local file to S3 or to a form upload endpoint.
//!
//! ```shell
//! $ chunked-upload --bucket my-bucket --key scans/a.dcm ./a.dcm
//! $ chunked-upload --endpoint https://example.com/files/upload --public ./a.dcm
//! ```
//!
//! Tuning options can also be set through the `UPLOAD_*` environment variables.
//! Press Ctrl-C to stop scheduling new parts; the parts already in flight are
//! allowed to finish.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use clap::{ArgGroup, Parser};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use url::Url;

use chunked_upload::queue::ProgressFn;
use chunked_upload::{
    upload, FormTransport, S3Transport, UploadConfig, UploadOptions, UploadTransport,
};

#[derive(Debug, Parser)]
#[command(version, about)]
#[command(group(ArgGroup::new("destination").required(true).args(["bucket", "endpoint"])))]
struct Cli {
    /// The file to upload.
    path: PathBuf,
    /// Upload to this S3 bucket.
    #[arg(long)]
    bucket: Option<String>,
    /// Object key within the bucket. Defaults to the file name.
    #[arg(long)]
    key: Option<String>,
    /// Upload through this form endpoint.
    #[arg(long)]
    endpoint: Option<Url>,
    #[arg(long)]
    content_type: Option<String>,
    /// Make the uploaded object publicly readable.
    #[arg(long)]
    public: bool,
    #[command(flatten)]
    config: UploadConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let filename = match &cli.key {
        Some(key) => key.clone(),
        None => cli
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .with_context(|| format!("Can't derive an object name from {}", cli.path.display()))?,
    };
    let source = tokio::fs::read(&cli.path)
        .await
        .with_context(|| format!("Error reading {}", cli.path.display()))?;

    let transport: Arc<dyn UploadTransport> = match (&cli.bucket, &cli.endpoint) {
        (Some(bucket), _) => Arc::new(S3Transport::from_env(bucket.clone()).await?),
        (None, Some(endpoint)) => Arc::new(FormTransport::new(reqwest::Client::new(), endpoint.clone())),
        (None, None) => anyhow::bail!("Either --bucket or --endpoint is required"),
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, waiting for in-flight parts to finish");
                cancel.cancel();
            }
        }
    });

    let mut options = UploadOptions::from_config(&cli.config);
    let on_progress: Arc<ProgressFn> = Arc::new(|percent: f64| tracing::info!(percent, "Upload progress"));
    options.on_progress = Some(on_progress);
    options.cancel_token = Some(cancel);
    options.content_type = cli.content_type.clone();
    options.is_public = cli.public;

    let object_ref = upload(transport.as_ref(), Bytes::from(source), filename, options)
        .await
        .context("Upload failed")?;
    tracing::info!(%object_ref, "Upload complete");
    Ok(())
}
