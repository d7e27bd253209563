//! The seam between the upload engine and the storage backend.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::types::{CompleteUpload, ETag, ObjectRef, PartNumber, StartUpload, UploadId};

#[cfg(feature = "form")]
mod form;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "form")]
pub use form::FormTransport;
#[cfg(feature = "s3")]
pub use s3::S3Transport;

/// The three calls a multipart upload needs from its backend.
///
/// Implementations classify their failures through
/// [TransportErrorKind](crate::error::TransportErrorKind); the engine retries
/// transient errors and stops on everything else.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Open a multipart transaction and return its identifier.
    async fn start_upload(&self, request: &StartUpload) -> Result<UploadId, TransportError>;

    /// Upload the bytes of one part.
    async fn upload_part(
        &self,
        filename: &str,
        upload_id: &UploadId,
        part_number: PartNumber,
        body: Bytes,
    ) -> Result<ETag, TransportError>;

    /// Commit the transaction. The parts are sorted by part number.
    async fn complete_upload(&self, request: &CompleteUpload) -> Result<ObjectRef, TransportError>;
}

#[async_trait]
impl<T: UploadTransport + ?Sized> UploadTransport for std::sync::Arc<T> {
    async fn start_upload(&self, request: &StartUpload) -> Result<UploadId, TransportError> {
        (**self).start_upload(request).await
    }

    async fn upload_part(
        &self,
        filename: &str,
        upload_id: &UploadId,
        part_number: PartNumber,
        body: Bytes,
    ) -> Result<ETag, TransportError> {
        (**self)
            .upload_part(filename, upload_id, part_number, body)
            .await
    }

    async fn complete_upload(&self, request: &CompleteUpload) -> Result<ObjectRef, TransportError> {
        (**self).complete_upload(request).await
    }
}
