//! S3 multipart transport.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{event, instrument, Level};

use super::UploadTransport;
use crate::error::{TransportError, TransportErrorKind};
use crate::localstack;
use crate::types::{CompleteUpload, ETag, ObjectRef, PartNumber, StartUpload, UploadId};

/// S3 error codes which no amount of retrying will fix.
const REJECTED_CODES: &[&str] = &[
    "AccessDenied",
    "EntityTooSmall",
    "InvalidPart",
    "InvalidPartOrder",
    "NoSuchBucket",
    "NoSuchUpload",
];

/// S3 error codes reporting an exhausted quota.
const QUOTA_CODES: &[&str] = &["QuotaExceeded", "ServiceQuotaExceeded"];

/// An [UploadTransport] writing to an S3 bucket, using the upload filename as
/// the object key.
///
/// ## Note
/// On failure the multipart upload is not aborted. It is up to the
/// caller to call the S3 `AbortMultipartUpload` API when required.
///
/// ```no_run
/// use chunked_upload::transport::S3Transport;
///
/// # tokio_test::block_on(async {
/// let transport = S3Transport::from_env("my-bucket").await.unwrap();
/// # })
/// ```
#[derive(Debug, Clone)]
pub struct S3Transport {
    client: Client,
    bucket: String,
}

impl S3Transport {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Create a transport from the environment's AWS configuration.
    ///
    /// ## LocalStack
    ///
    /// If `LOCALSTACK_HOSTNAME` is set, requests go to that host instead
    /// (port `EDGE_PORT`, default `4566`) using path-style addressing.
    pub async fn from_env(bucket: impl Into<String>) -> anyhow::Result<Self> {
        let shared_config = aws_config::load_from_env().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(uri) = localstack::get_endpoint_uri()? {
            builder = builder.endpoint_url(uri.to_string()).force_path_style(true);
        }
        Ok(Self::new(Client::from_conf(builder.build()), bucket))
    }
}

/// Map an SDK failure onto the engine's retry classification.
fn classify<E, R>(error: SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let kind = match &error {
        SdkError::ConstructionFailure(_) => TransportErrorKind::Rejected,
        SdkError::ServiceError(_) => match error.code() {
            Some(code) if QUOTA_CODES.contains(&code) => TransportErrorKind::QuotaExceeded,
            Some(code) if REJECTED_CODES.contains(&code) => TransportErrorKind::Rejected,
            _ => TransportErrorKind::Transient,
        },
        _ => TransportErrorKind::Transient,
    };
    TransportError::new(kind, DisplayErrorContext(&error).to_string())
}

fn part_number_i32(part_number: PartNumber) -> Result<i32, TransportError> {
    i32::try_from(part_number.get())
        .map_err(|_| TransportError::rejected(format!("part number {part_number} out of range")))
}

#[async_trait]
impl UploadTransport for S3Transport {
    #[instrument(skip(self))]
    async fn start_upload(&self, request: &StartUpload) -> Result<UploadId, TransportError> {
        let acl = if request.is_public {
            ObjectCannedAcl::PublicRead
        } else {
            ObjectCannedAcl::BucketOwnerFullControl
        };
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&request.filename)
            .set_content_type(request.content_type.clone())
            .acl(acl)
            .send()
            .await
            .map_err(classify)?;

        let upload_id = result
            .upload_id()
            .ok_or_else(|| TransportError::rejected("Missing multipart upload id"))?;
        event!(Level::DEBUG, upload_id, "Created multipart upload");
        Ok(upload_id.into())
    }

    #[instrument(skip(self, body), fields(len = body.len()))]
    async fn upload_part(
        &self,
        filename: &str,
        upload_id: &UploadId,
        part_number: PartNumber,
        body: Bytes,
    ) -> Result<ETag, TransportError> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(filename)
            .upload_id(upload_id.as_str())
            .part_number(part_number_i32(part_number)?)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify)?;

        response
            .e_tag()
            .map(ETag::from)
            .ok_or_else(|| TransportError::transient(format!("Missing ETag for part {part_number}")))
    }

    #[instrument(skip(self, request), fields(upload_id = %request.upload_id, parts = request.parts.len()))]
    async fn complete_upload(&self, request: &CompleteUpload) -> Result<ObjectRef, TransportError> {
        let parts = request
            .parts
            .iter()
            .map(|part| {
                Ok(S3CompletedPart::builder()
                    .e_tag(part.e_tag.as_str())
                    .part_number(part_number_i32(part.part_number)?)
                    .build())
            })
            .collect::<Result<Vec<_>, TransportError>>()?;

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&request.filename)
            .upload_id(request.upload_id.as_str())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(classify)?;

        let object_ref = response
            .location()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("s3://{}/{}", self.bucket, request.filename));
        Ok(object_ref.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{upload, UploadOptions};
    use crate::types::CompletedPart;
    use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
    use bytesize::MIB;
    use serial_test::serial;

    #[test]
    fn test_part_number_conversion() {
        assert_eq!(part_number_i32(PartNumber::from(10_000)).unwrap(), 10_000);
        let e = part_number_i32(PartNumber::from(u32::MAX)).unwrap_err();
        assert_eq!(e.kind, TransportErrorKind::Rejected);
    }

    #[test]
    fn test_code_tables_are_disjoint() {
        assert!(QUOTA_CODES.iter().all(|c| !REJECTED_CODES.contains(c)));
    }

    // *** Integration tests *** //
    // These need a running LocalStack, see `localstack::test_utils`.

    const TEST_BUCKET: &str = "test-chunked-upload-bucket";

    async fn localstack_test_transport() -> S3Transport {
        localstack::test_utils::wait_for_localstack().await;
        let transport = S3Transport::from_env(TEST_BUCKET).await.unwrap();
        let constraint = CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::ApSoutheast2)
            .build();
        let created = transport
            .client
            .create_bucket()
            .bucket(TEST_BUCKET)
            .create_bucket_configuration(constraint)
            .send()
            .await;
        if let Err(e) = created {
            let code = e.code().map(str::to_owned);
            assert!(
                matches!(code.as_deref(), Some("BucketAlreadyOwnedByYou" | "BucketAlreadyExists")),
                "{}",
                DisplayErrorContext(&e)
            );
        }
        transport
    }

    async fn fetch_bytes(transport: &S3Transport, key: &str) -> Bytes {
        let object = transport
            .client
            .get_object()
            .bucket(TEST_BUCKET)
            .key(key)
            .send()
            .await
            .unwrap();
        object.body.collect().await.unwrap().into_bytes()
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires LocalStack"]
    async fn test_upload_12mib_in_three_parts() {
        let transport = localstack_test_transport().await;
        let source: Bytes = (0..12 * MIB).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();
        let options = UploadOptions::builder()
            .chunk_size(Some(5 * MIB))
            .content_type("application/octet-stream")
            .build();

        let object_ref = upload(&transport, source.clone(), "uploads/12mib.bin", options)
            .await
            .unwrap();

        assert!(object_ref.to_string().contains("12mib.bin"), "{object_ref}");
        assert_eq!(fetch_bytes(&transport, "uploads/12mib.bin").await, source);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires LocalStack"]
    async fn test_upload_single_small_part() {
        let transport = localstack_test_transport().await;
        let source = Bytes::from_static(b"a single small part");

        upload(&transport, source.clone(), "uploads/small.txt", UploadOptions::default())
            .await
            .unwrap();

        assert_eq!(fetch_bytes(&transport, "uploads/small.txt").await, source);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires LocalStack"]
    async fn test_parts_sent_in_order_to_complete() {
        let transport = localstack_test_transport().await;
        let request = StartUpload {
            filename: "uploads/manual.bin".into(),
            content_type: None,
            is_public: false,
            field_id: None,
        };
        let upload_id = transport.start_upload(&request).await.unwrap();
        let first = Bytes::from(vec![1_u8; 5 * MIB as usize]);
        let second = Bytes::from(vec![2_u8; 1024]);

        // Upload the parts back to front.
        let e_tag_2 = transport
            .upload_part(&request.filename, &upload_id, PartNumber::from(2), second.clone())
            .await
            .unwrap();
        let e_tag_1 = transport
            .upload_part(&request.filename, &upload_id, PartNumber::from(1), first.clone())
            .await
            .unwrap();
        transport
            .complete_upload(&CompleteUpload {
                filename: request.filename.clone(),
                upload_id,
                parts: vec![
                    CompletedPart {
                        e_tag: e_tag_1,
                        part_number: PartNumber::from(1),
                    },
                    CompletedPart {
                        e_tag: e_tag_2,
                        part_number: PartNumber::from(2),
                    },
                ],
                is_public: false,
                field_id: None,
            })
            .await
            .unwrap();

        let body = fetch_bytes(&transport, &request.filename).await;
        assert_eq!(body.len(), first.len() + second.len());
        assert_eq!(body.slice(..first.len()), first);
        assert_eq!(body.slice(first.len()..), second);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires LocalStack"]
    async fn test_unknown_upload_id_is_rejected() {
        let transport = localstack_test_transport().await;

        let e = transport
            .upload_part(
                "uploads/missing.bin",
                &UploadId::from("no-such-upload"),
                PartNumber::from(1),
                Bytes::from_static(b"data"),
            )
            .await
            .unwrap_err();

        assert_eq!(e.kind, TransportErrorKind::Rejected, "{e}");
    }
}
