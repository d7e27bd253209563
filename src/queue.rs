//! Bounded-concurrency scheduling of part uploads.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, warn, Level};

use crate::error::UploadError;
use crate::planner::ChunkPlan;
use crate::transport::UploadTransport;
use crate::types::CompletedPart;
use crate::uploader::PartUploader;

/// Default number of parts which can be uploaded concurrently.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;

/// Receives the completed percentage, rounded to two decimal places.
pub type ProgressFn = dyn Fn(f64) + Send + Sync;

/// `min(100, completed * 100 / total)`, rounded to two decimal places.
pub fn progress_percent(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let percent = (completed as f64 * 100.0 / total as f64).min(100.0);
    (percent * 100.0).round() / 100.0
}

/// Delivers progress to the caller's callback on a blocking thread, so the
/// callback never holds up the task that polls the uploads.
struct ProgressReporter {
    sender: mpsc::UnboundedSender<f64>,
    worker: JoinHandle<()>,
}

impl ProgressReporter {
    fn spawn(on_progress: Arc<ProgressFn>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || {
            while let Some(percent) = receiver.blocking_recv() {
                on_progress(percent);
            }
        });
        Self { sender, worker }
    }

    fn report(&self, percent: f64) {
        // Only fails once the worker has gone, which means the callback panicked.
        let _ = self.sender.send(percent);
    }

    /// Wait for every reported value to reach the callback.
    async fn finish(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Progress callback failed");
        }
    }
}

/// Schedules every part of a [ChunkPlan] with at most `limit` uploads in flight.
///
/// All scheduling decisions and all bookkeeping happen on the task that
/// drives [UploadQueue::run]. Uploads in flight are polled together and may
/// finish in any order.
pub struct UploadQueue<'a> {
    limit: NonZeroUsize,
    cancel: &'a CancellationToken,
    on_progress: Option<Arc<ProgressFn>>,
}

impl<'a> UploadQueue<'a> {
    pub fn new(
        limit: NonZeroUsize,
        cancel: &'a CancellationToken,
        on_progress: Option<Arc<ProgressFn>>,
    ) -> Self {
        Self {
            limit,
            cancel,
            on_progress,
        }
    }

    /// Upload every part of `plan`, slicing each one from `source` as it is
    /// scheduled.
    ///
    /// The first error observed wins. After it, or after cancellation, no
    /// more parts are scheduled, but uploads already in flight are allowed to
    /// finish before this returns. Their results are discarded.
    ///
    /// The progress callback runs on a separate blocking thread. All values
    /// have been delivered to it by the time this returns.
    ///
    /// The returned parts are in completion order, not part order.
    #[instrument(skip_all, fields(chunk_amount = plan.chunk_amount(), limit = self.limit.get()))]
    pub async fn run<T: UploadTransport + ?Sized>(
        &self,
        source: &Bytes,
        plan: &ChunkPlan,
        uploader: &PartUploader<'_, T>,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let reporter = self.on_progress.clone().map(ProgressReporter::spawn);
        let result = self.schedule(source, plan, uploader, reporter.as_ref()).await;
        if let Some(reporter) = reporter {
            reporter.finish().await;
        }
        result
    }

    async fn schedule<T: UploadTransport + ?Sized>(
        &self,
        source: &Bytes,
        plan: &ChunkPlan,
        uploader: &PartUploader<'_, T>,
        reporter: Option<&ProgressReporter>,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let chunk_amount = plan.chunk_amount();
        let mut pending = plan.parts();
        let mut in_flight = FuturesUnordered::new();
        let mut completed: Vec<CompletedPart> = Vec::new();
        let mut fatal: Option<UploadError> = None;

        loop {
            // Fill free slots.
            while fatal.is_none() && !self.cancel.is_cancelled() && in_flight.len() < self.limit.get() {
                let Some(part) = pending.next() else {
                    break;
                };
                let body = source.slice(part.byte_range.as_range());
                event!(Level::DEBUG, part_number = %part.part_number, "Scheduling part");
                in_flight.push(uploader.upload_with_retry(part, body));
            }

            // Wait for a slot to free up, or for the last uploads to drain.
            let Some(result) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(part) if fatal.is_none() => {
                    completed.push(part);
                    if let Some(reporter) = reporter {
                        reporter.report(progress_percent(completed.len() as u64, chunk_amount));
                    }
                }
                Ok(part) => {
                    event!(Level::DEBUG, part_number = %part.part_number, "Discarding part finished after failure");
                }
                Err(e) if fatal.is_none() => {
                    warn!(error = %e, in_flight = in_flight.len(), "Upload failed, draining in-flight parts");
                    fatal = Some(e);
                }
                Err(e) => {
                    event!(Level::DEBUG, error = %e, "Ignoring error after first failure");
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            event!(Level::INFO, completed = completed.len(), "Upload cancelled");
            return Err(UploadError::Cancelled);
        }
        if completed.len() as u64 != chunk_amount {
            return Err(UploadError::MissingParts {
                expected: chunk_amount,
                received: completed.len() as u64,
            });
        }
        Ok(completed)
    }
}
