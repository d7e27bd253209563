//! Drives a single upload from planning to completion.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use derive_more::Display;
use tokio_util::sync::CancellationToken;
use tracing::{event, info, instrument, Level};
use typed_builder::TypedBuilder;

use crate::assembler::CompletionAssembler;
use crate::config::UploadConfig;
use crate::error::{ConfigurationError, Result, UploadError};
use crate::planner::plan;
use crate::queue::{ProgressFn, UploadQueue, DEFAULT_CONCURRENCY_LIMIT};
use crate::retry::{
    RetryPolicy, DEFAULT_COMPLETE_MAX_TRIES, DEFAULT_COMPLETE_RETRY_DELAY, DEFAULT_PART_MAX_TRIES,
    DEFAULT_PART_RETRY_DELAY,
};
use crate::transport::UploadTransport;
use crate::types::{CompleteUpload, ObjectRef, StartUpload, UploadId};
use crate::uploader::PartUploader;

/// Where an [UploadSession] is in its lifecycle.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Created,
    Uploading,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

/// Caller-supplied settings for one upload.
///
/// ```
/// use chunked_upload::UploadOptions;
///
/// let options = UploadOptions::builder()
///     .chunk_size(Some(8 * 1024 * 1024))
///     .concurrency_limit(4)
///     .is_public(true)
///     .build();
/// assert_eq!(options.max_tries_for_each_chunk, 5);
/// ```
#[derive(derive_more::Debug, Clone, TypedBuilder)]
pub struct UploadOptions {
    /// Size of each part. Defaults to 7 MiB.
    #[builder(default)]
    pub chunk_size: Option<u64>,
    #[builder(default = DEFAULT_CONCURRENCY_LIMIT)]
    pub concurrency_limit: usize,
    #[builder(default = DEFAULT_PART_MAX_TRIES)]
    pub max_tries_for_each_chunk: u32,
    /// Fixed delay before retrying a failed part.
    #[builder(default = DEFAULT_PART_RETRY_DELAY)]
    pub timeout_for_each_failed_chunk: Duration,
    #[builder(default = DEFAULT_COMPLETE_MAX_TRIES)]
    pub complete_max_tries: u32,
    #[builder(default = DEFAULT_COMPLETE_RETRY_DELAY)]
    pub complete_retry_delay: Duration,
    /// Called with the completed percentage after each part, in order, on a
    /// blocking thread of its own.
    #[debug(skip)]
    #[builder(default, setter(strip_option))]
    pub on_progress: Option<Arc<ProgressFn>>,
    /// Cancel this token to stop the upload. Uploads already in flight are
    /// allowed to finish first.
    #[builder(default, setter(strip_option))]
    pub cancel_token: Option<CancellationToken>,
    #[builder(default, setter(strip_option, into))]
    pub content_type: Option<String>,
    #[builder(default)]
    pub is_public: bool,
    #[builder(default, setter(strip_option, into))]
    pub field_id: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl UploadOptions {
    /// Seed the tuning options from an [UploadConfig], leaving the
    /// per-upload metadata unset.
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            chunk_size: Some(config.chunk_size),
            concurrency_limit: config.concurrency,
            max_tries_for_each_chunk: config.part_max_tries,
            timeout_for_each_failed_chunk: config.part_retry_delay(),
            complete_max_tries: config.complete_max_tries,
            complete_retry_delay: config.complete_retry_delay(),
            ..Self::default()
        }
    }
}

/// One multipart upload against a transport.
///
/// A session is used for a single [UploadSession::upload] call. Nothing is
/// persisted, so an interrupted upload can't be resumed.
#[derive(derive_more::Debug)]
pub struct UploadSession<'a, T: ?Sized> {
    #[debug(skip)]
    transport: &'a T,
    filename: String,
    options: UploadOptions,
    state: UploadState,
    upload_id: Option<UploadId>,
}

impl<'a, T: UploadTransport + ?Sized> UploadSession<'a, T> {
    pub fn new(transport: &'a T, filename: impl Into<String>, options: UploadOptions) -> Self {
        Self {
            transport,
            filename: filename.into(),
            options,
            state: UploadState::Created,
            upload_id: None,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// The identifier issued by the backend, once the upload has started.
    pub fn upload_id(&self) -> Option<&UploadId> {
        self.upload_id.as_ref()
    }

    /// Upload `source` and return a reference to the committed object.
    ///
    /// Configuration is validated before any call is made to the transport.
    /// The first fatal error ends the upload and completion is not
    /// attempted. Exactly one error is returned for a failed upload.
    ///
    /// A session uploads once. Calling this again returns
    /// [UploadError::SessionReused] and leaves the session untouched.
    #[instrument(skip_all, fields(filename = %self.filename, total_size = source.len()))]
    pub async fn upload(&mut self, source: Bytes) -> Result<ObjectRef> {
        if self.state != UploadState::Created {
            return Err(UploadError::SessionReused { state: self.state });
        }
        let result = self.run(source).await;
        let state = match &result {
            Ok(_) => UploadState::Completed,
            Err(UploadError::Cancelled) => UploadState::Cancelled,
            Err(_) => UploadState::Failed,
        };
        self.transition(state);
        result
    }

    async fn run(&mut self, source: Bytes) -> Result<ObjectRef> {
        let cancel = self.options.cancel_token.clone().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let limit = NonZeroUsize::new(self.options.concurrency_limit)
            .ok_or(ConfigurationError::ZeroConcurrency)?;
        let part_policy = RetryPolicy::new(
            "max_tries_for_each_chunk",
            self.options.max_tries_for_each_chunk,
            self.options.timeout_for_each_failed_chunk,
        )?;
        let complete_policy = RetryPolicy::new(
            "complete_max_tries",
            self.options.complete_max_tries,
            self.options.complete_retry_delay,
        )?;
        let plan = plan(source.len() as u64, self.options.chunk_size)?;
        event!(
            Level::DEBUG,
            chunk_size = %plan.chunk_size(),
            chunk_amount = plan.chunk_amount(),
            "Planned upload"
        );

        let upload_id = self
            .transport
            .start_upload(&StartUpload {
                filename: self.filename.clone(),
                content_type: self.options.content_type.clone(),
                is_public: self.options.is_public,
                field_id: self.options.field_id.clone(),
            })
            .await
            .map_err(UploadError::Start)?;
        info!(%upload_id, "Upload started");
        self.upload_id = Some(upload_id.clone());
        self.transition(UploadState::Uploading);

        let uploader = PartUploader::new(
            self.transport,
            &self.filename,
            &upload_id,
            part_policy,
            &cancel,
        );
        let queue = UploadQueue::new(limit, &cancel, self.options.on_progress.clone());
        let parts = queue.run(&source, &plan, &uploader).await?;

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        self.transition(UploadState::Completing);
        CompletionAssembler::new(self.transport, complete_policy, &cancel)
            .complete(CompleteUpload {
                filename: self.filename.clone(),
                upload_id,
                parts,
                is_public: self.options.is_public,
                field_id: self.options.field_id.clone(),
            })
            .await
    }

    fn transition(&mut self, state: UploadState) {
        info!(from = %self.state, to = %state, "Upload state changed");
        self.state = state;
    }
}

/// Upload `source` as `filename` in a single call.
///
/// # Example
///
/// ```no_run
/// use chunked_upload::{upload, FormTransport, UploadOptions};
/// use url::Url;
///
/// # tokio_test::block_on(async {
/// let transport = FormTransport::new(
///     reqwest::Client::new(),
///     Url::parse("https://example.com/upload").unwrap(),
/// );
/// let options = UploadOptions::builder()
///     .on_progress(std::sync::Arc::new(|percent: f64| println!("{percent}%")))
///     .build();
/// let object_ref = upload(&transport, vec![0_u8; 20 << 20], "data.bin", options)
///     .await
///     .unwrap();
/// # })
/// ```
pub async fn upload<T: UploadTransport + ?Sized>(
    transport: &T,
    source: impl Into<Bytes>,
    filename: impl Into<String>,
    options: UploadOptions,
) -> Result<ObjectRef> {
    UploadSession::new(transport, filename, options)
        .upload(source.into())
        .await
}
