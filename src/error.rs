//! Error types for the upload pipeline.

use thiserror::Error;

use crate::session::UploadState;
use crate::types::PartNumber;

/// Message prefix some backends use to report an exhausted usage quota
/// when they don't provide a structured error code.
pub const QUOTA_EXCEEDED_PREFIX: &str = "Usage limit exceeded";

/// How a transport failure should be treated by the retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The account or endpoint has run out of quota. Never retried.
    QuotaExceeded,
    /// The request can never succeed as sent. Never retried.
    Rejected,
    /// Timeouts, 5xx responses, dropped connections and everything else.
    Transient,
}

/// A failure reported by an [UploadTransport](crate::transport::UploadTransport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Transient, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::QuotaExceeded, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Rejected, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Build an error from a bare message, recognising the quota prefix.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.starts_with(QUOTA_EXCEEDED_PREFIX) {
            Self::quota_exceeded(message)
        } else {
            Self::transient(message)
        }
    }

    /// Fatal errors short-circuit retries and halt scheduling.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::Transient)
    }
}

/// Invalid chunk size or concurrency settings. Raised before any network call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("chunk_size was {chunk_size}, can not be less than {min} when the upload has {chunk_amount} parts")]
    ChunkTooSmall {
        chunk_size: u64,
        min: u64,
        chunk_amount: u64,
    },
    #[error("chunk_size must not be 0")]
    ZeroChunkSize,
    #[error("upload needs {chunk_amount} parts, more than the {max} a part number can address")]
    TooManyParts { chunk_amount: u64, max: u64 },
    #[error("concurrency limit must not be 0")]
    ZeroConcurrency,
    #[error("{0} must allow at least one attempt")]
    ZeroTries(&'static str),
}

/// The single error an upload call resolves with.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("failed to start upload: {0}")]
    Start(#[source] TransportError),
    #[error("failed to upload part {part_number} after {attempts} attempt(s): {source}")]
    Part {
        part_number: PartNumber,
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("failed to complete upload after {attempts} attempt(s): {source}")]
    Complete {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("expected {expected} completed parts, received {received}")]
    MissingParts { expected: u64, received: u64 },
    #[error("upload cancelled")]
    Cancelled,
    #[error("upload session can only be used once, it is already {state}")]
    SessionReused { state: UploadState },
}

impl UploadError {
    /// The transport failure behind this error, if there was one.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            UploadError::Start(source)
            | UploadError::Part { source, .. }
            | UploadError::Complete { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_fatal_quota(&self) -> bool {
        self.transport_error()
            .is_some_and(|e| e.kind == TransportErrorKind::QuotaExceeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_message_detects_quota_prefix() {
        let e = TransportError::from_message("Usage limit exceeded for plan");
        assert_eq!(e.kind, TransportErrorKind::QuotaExceeded);
        assert!(e.is_fatal());
    }

    #[test]
    fn test_from_message_defaults_to_transient() {
        let e = TransportError::from_message("connection reset by peer");
        assert_eq!(e.kind, TransportErrorKind::Transient);
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_prefix_must_lead_the_message() {
        let e = TransportError::from_message("error: Usage limit exceeded");
        assert_eq!(e.kind, TransportErrorKind::Transient);
    }

    #[test]
    fn test_part_error_names_the_part() {
        let e = UploadError::Part {
            part_number: PartNumber::from(4),
            attempts: 5,
            source: TransportError::transient("timed out"),
        };
        assert_eq!(
            e.to_string(),
            "failed to upload part 4 after 5 attempt(s): timed out"
        );
        assert!(!e.is_fatal_quota());
    }

    #[test]
    fn test_quota_detected_at_any_stage() {
        let quota = TransportError::quota_exceeded("Usage limit exceeded");
        assert!(UploadError::Start(quota.clone()).is_fatal_quota());
        assert!(UploadError::Complete {
            attempts: 1,
            source: quota
        }
        .is_fatal_quota());
        assert!(!UploadError::Cancelled.is_fatal_quota());
    }
}
