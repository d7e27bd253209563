//! Uploads a single part, with retries.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

use crate::error::UploadError;
use crate::planner::Part;
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::transport::UploadTransport;
use crate::types::{CompletedPart, UploadId};

/// Uploads one part of a multipart transaction, retrying transient failures.
///
/// Knows nothing about concurrency; the queue decides when to call it.
#[derive(Debug)]
pub struct PartUploader<'a, T: ?Sized> {
    transport: &'a T,
    filename: &'a str,
    upload_id: &'a UploadId,
    policy: RetryPolicy,
    cancel: &'a CancellationToken,
}

impl<'a, T: UploadTransport + ?Sized> PartUploader<'a, T> {
    pub fn new(
        transport: &'a T,
        filename: &'a str,
        upload_id: &'a UploadId,
        policy: RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transport,
            filename,
            upload_id,
            policy,
            cancel,
        }
    }

    /// Upload `body` as `part`.
    ///
    /// Fatal transport errors are returned after a single attempt. Otherwise
    /// the part is attempted up to `max_tries` times with a fixed delay, and
    /// the final error names the part number and attempt count.
    #[instrument(skip(self, body), fields(part_number = %part.part_number, len = body.len()))]
    pub async fn upload_with_retry(
        &self,
        part: Part,
        body: Bytes,
    ) -> Result<CompletedPart, UploadError> {
        let result = retry(self.policy, self.cancel, |attempt| {
            event!(Level::DEBUG, attempt, "Uploading part");
            self.transport
                .upload_part(self.filename, self.upload_id, part.part_number, body.clone())
        })
        .await;

        match result {
            Ok(e_tag) => {
                event!(Level::DEBUG, %e_tag, "Part uploaded");
                Ok(CompletedPart {
                    e_tag,
                    part_number: part.part_number,
                })
            }
            Err(RetryError::Failed { attempts, source }) => Err(UploadError::Part {
                part_number: part.part_number,
                attempts,
                source,
            }),
            Err(RetryError::Cancelled) => Err(UploadError::Cancelled),
        }
    }
}
