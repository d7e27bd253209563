//! # Chunked multipart uploads
//!
//! This library splits a byte buffer into fixed-size parts and uploads them
//! to a storage backend as a single multipart transaction. Parts are uploaded
//! concurrently, up to a configurable limit, and transient failures are
//! retried with a fixed delay. Once every part has been uploaded the
//! transaction is committed with the parts sorted by part number.
//!
//! The backend is abstracted behind [UploadTransport]. Two implementations
//! are provided:
//!
//! * [FormTransport] (feature `form`) posts multipart forms to an upload endpoint.
//! * [S3Transport] (feature `s3`) talks to S3, or to [LocalStack](https://localstack.cloud/).
//!
//! ## Error handling
//!
//! An upload resolves with exactly one [UploadError]. Quota errors and
//! requests the backend rejects outright are never retried and stop any
//! further parts from being scheduled. Uploads already in flight are allowed
//! to finish, but the transaction is not committed.
//!
//! ## Cancellation
//!
//! Pass a [CancellationToken](tokio_util::sync::CancellationToken) in
//! [UploadOptions::cancel_token]. Cancellation is cooperative: no new parts
//! are scheduled, retry delays are cut short, and the upload resolves with
//! [UploadError::Cancelled] once in-flight parts have finished.

// Public modules

pub mod assembler;
pub mod config;
pub mod error;
pub mod planner;
pub mod queue;
pub mod retry;
pub mod session;
pub mod transport;
pub mod types;
pub mod uploader;
// Internal shared modules
#[cfg(feature = "s3")]
mod localstack;
#[cfg(test)]
mod test_utils;

pub use config::UploadConfig;
pub use error::{ConfigurationError, TransportError, TransportErrorKind, UploadError};
pub use planner::{plan, ChunkPlan};
pub use session::{upload, UploadOptions, UploadSession, UploadState};
#[cfg(feature = "form")]
pub use transport::FormTransport;
#[cfg(feature = "s3")]
pub use transport::S3Transport;
pub use transport::UploadTransport;
pub use types::{CompletedPart, ETag, ObjectRef, PartNumber, UploadId};
