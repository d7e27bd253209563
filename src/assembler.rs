//! Commits a multipart transaction from its completed parts.

use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

use crate::error::UploadError;
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::transport::UploadTransport;
use crate::types::{CompleteUpload, ObjectRef};

/// Issues the completion call, with retries.
#[derive(Debug)]
pub struct CompletionAssembler<'a, T: ?Sized> {
    transport: &'a T,
    policy: RetryPolicy,
    cancel: &'a CancellationToken,
}

impl<'a, T: UploadTransport + ?Sized> CompletionAssembler<'a, T> {
    pub fn new(transport: &'a T, policy: RetryPolicy, cancel: &'a CancellationToken) -> Self {
        Self {
            transport,
            policy,
            cancel,
        }
    }

    /// Sort the parts by part number and commit them.
    ///
    /// Parts may arrive in any order; the backend requires them ascending.
    #[instrument(skip_all, fields(upload_id = %request.upload_id, parts = request.parts.len()))]
    pub async fn complete(&self, mut request: CompleteUpload) -> Result<ObjectRef, UploadError> {
        request.parts.sort_by_key(|part| part.part_number);

        let result = retry(self.policy, self.cancel, |attempt| {
            event!(Level::DEBUG, attempt, "Completing upload");
            self.transport.complete_upload(&request)
        })
        .await;

        match result {
            Ok(object_ref) => {
                event!(Level::DEBUG, %object_ref, "Upload completed");
                Ok(object_ref)
            }
            Err(RetryError::Failed { attempts, source }) => {
                Err(UploadError::Complete { attempts, source })
            }
            Err(RetryError::Cancelled) => Err(UploadError::Cancelled),
        }
    }
}
