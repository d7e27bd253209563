//! Form-encoded multipart transport.
//!
//! Every call is a `multipart/form-data` POST to a single endpoint. An
//! `action` field selects between `start`, `upload` and `end`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{event, instrument, Level};
use url::Url;

use super::UploadTransport;
use crate::error::{TransportError, TransportErrorKind, QUOTA_EXCEEDED_PREFIX};
use crate::types::{CompleteUpload, ETag, ObjectRef, PartNumber, StartUpload, UploadId};

/// Structured error code for an exhausted usage quota.
const QUOTA_EXCEEDED_CODE: &str = "usage_limit_exceeded";

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(rename = "uploadID")]
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "ETag")]
    e_tag: String,
}

#[derive(Debug, Deserialize)]
struct EndResponse {
    #[serde(rename = "objectRef")]
    object_ref: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// An [UploadTransport] which posts form-encoded requests to one endpoint.
///
/// ```no_run
/// use chunked_upload::transport::FormTransport;
///
/// let endpoint = "https://storage.example.com/files/upload".parse().unwrap();
/// let transport = FormTransport::new(reqwest::Client::new(), endpoint);
/// ```
#[derive(Debug, Clone)]
pub struct FormTransport {
    client: Client,
    endpoint: Url,
}

impl FormTransport {
    pub fn new(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    fn form(action: &'static str, filename: &str) -> Form {
        Form::new()
            .text("action", action)
            .text("filename", filename.to_owned())
    }

    fn with_routing(mut form: Form, is_public: bool, field_id: Option<&str>) -> Form {
        if is_public {
            form = form.text("public", "true");
        }
        if let Some(field_id) = field_id {
            form = form.text("field_id", field_id.to_owned());
        }
        form
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, form: Form) -> Result<T, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::transient(e.to_string()))?;
        let response = check_status(response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::transient(e.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|e| TransportError::rejected(format!("Unexpected response body: {e}")))
    }
}

/// Turn a non-success response into a classified [TransportError].
async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status.as_u16(), &body))
}

fn classify_failure(status: u16, body: &str) -> TransportError {
    let error: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    // The quota prefix is matched against the backend's own text, never the
    // status line added below.
    let detail = error.message.as_deref().unwrap_or(body.trim());
    let kind = if error.code.as_deref() == Some(QUOTA_EXCEEDED_CODE)
        || detail.starts_with(QUOTA_EXCEEDED_PREFIX)
    {
        TransportErrorKind::QuotaExceeded
    } else {
        TransportErrorKind::Transient
    };
    let message = match error.message {
        Some(message) => message,
        None => format!("HTTP {status}: {body}"),
    };
    TransportError::new(kind, message).with_status(status)
}

#[async_trait]
impl UploadTransport for FormTransport {
    #[instrument(skip(self))]
    async fn start_upload(&self, request: &StartUpload) -> Result<UploadId, TransportError> {
        let mut form = Self::form("start", &request.filename);
        if let Some(content_type) = &request.content_type {
            form = form.text("contentType", content_type.clone());
        }
        let form = Self::with_routing(form, request.is_public, request.field_id.as_deref());

        let response: StartResponse = self.send(form).await?;
        event!(Level::DEBUG, upload_id = %response.upload_id, "Started upload");
        Ok(response.upload_id.into())
    }

    #[instrument(skip(self, body), fields(len = body.len()))]
    async fn upload_part(
        &self,
        filename: &str,
        upload_id: &UploadId,
        part_number: PartNumber,
        body: Bytes,
    ) -> Result<ETag, TransportError> {
        let len = body.len() as u64;
        let file = Part::stream_with_length(reqwest::Body::from(body), len)
            .file_name(filename.to_owned())
            .mime_str("application/octet-stream")
            .map_err(|e| TransportError::rejected(e.to_string()))?;
        let form = Self::form("upload", filename)
            .text("upload_id", upload_id.to_string())
            .text("part", part_number.to_string())
            .part("file", file);

        let response: UploadResponse = self.send(form).await?;
        Ok(response.e_tag.into())
    }

    #[instrument(skip(self, request), fields(upload_id = %request.upload_id, parts = request.parts.len()))]
    async fn complete_upload(&self, request: &CompleteUpload) -> Result<ObjectRef, TransportError> {
        let parts = serde_json::to_string(&request.parts)
            .map_err(|e| TransportError::rejected(e.to_string()))?;
        let form = Self::form("end", &request.filename)
            .text("upload_id", request.upload_id.to_string())
            .text("parts", parts);
        let form = Self::with_routing(form, request.is_public, request.field_id.as_deref());

        let response: EndResponse = self.send(form).await?;
        Ok(response.object_ref.into())
    }
}
