//! Identifiers and records exchanged with the transport.

use derive_more::{AsRef, Display, From, Into};
use serde::{Deserialize, Serialize};

/// Opaque token identifying an in-progress multipart transaction.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, AsRef, From, Into, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl From<&str> for UploadId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl UploadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Integrity token returned by the backend for an uploaded part.
/// It must be passed back verbatim on completion.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, AsRef, From, Into, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl From<&str> for ETag {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl ETag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A 1-based part number.
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    From,
    Into,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct PartNumber(u32);

impl PartNumber {
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Reference to the committed object, as reported by the backend.
#[derive(Debug, Display, Clone, PartialEq, Eq, AsRef, From, Into, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectRef(String);

impl From<&str> for ObjectRef {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A successfully uploaded part.
///
/// Serialises as `{"ETag": ..., "PartNumber": ...}`, which is the
/// shape the completion call expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "ETag")]
    pub e_tag: ETag,
    #[serde(rename = "PartNumber")]
    pub part_number: PartNumber,
}

/// Metadata sent when a multipart transaction is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub is_public: bool,
    pub field_id: Option<String>,
}

/// Everything needed to commit a multipart transaction.
///
/// `parts` must already be sorted ascending by part number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteUpload {
    pub filename: String,
    pub upload_id: UploadId,
    pub parts: Vec<CompletedPart>,
    pub is_public: bool,
    pub field_id: Option<String>,
}
