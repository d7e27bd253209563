//! A scripted in-memory transport for exercising the upload pipeline.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::UploadTransport;
use crate::types::{CompleteUpload, CompletedPart, ETag, ObjectRef, PartNumber, StartUpload, UploadId};

pub(crate) const UPLOAD_ID: &str = "upload-1";

/// A transport call, as recorded by [StubTransport].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Start { filename: String },
    UploadPart { part_number: u32, len: usize },
    Complete { parts: Vec<CompletedPart> },
}

/// Records every call and answers with scripted failures and delays.
///
/// Part `n` succeeds with the ETag `e{n}` unless a failure has been queued
/// for it. Upload delays use tokio time, so tests should run with a paused
/// clock.
#[derive(Debug, Default)]
pub(crate) struct StubTransport {
    calls: Mutex<Vec<Call>>,
    start_failure: Option<TransportError>,
    part_failures: Mutex<HashMap<u32, VecDeque<TransportError>>>,
    complete_failures: Mutex<VecDeque<TransportError>>,
    part_delays: HashMap<u32, Duration>,
    default_delay: Duration,
    cancel_on_part: Option<(u32, CancellationToken)>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(mut self, error: TransportError) -> Self {
        self.start_failure = Some(error);
        self
    }

    /// Queue one failure for the next attempt of `part_number`.
    pub fn fail_part(self, part_number: u32, error: TransportError) -> Self {
        self.part_failures
            .lock()
            .unwrap()
            .entry(part_number)
            .or_default()
            .push_back(error);
        self
    }

    pub fn fail_complete(self, error: TransportError) -> Self {
        self.complete_failures.lock().unwrap().push_back(error);
        self
    }

    pub fn delay_part(mut self, part_number: u32, delay: Duration) -> Self {
        self.part_delays.insert(part_number, delay);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Cancel `token` as soon as `part_number` starts uploading.
    pub fn cancel_on_part(mut self, part_number: u32, token: CancellationToken) -> Self {
        self.cancel_on_part = Some((part_number, token));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn part_calls(&self, part_number: u32) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::UploadPart { part_number: n, .. } if *n == part_number))
            .count()
    }

    /// Distinct part numbers that were attempted, ascending.
    pub fn attempted_parts(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UploadPart { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn completions(&self) -> Vec<Vec<CompletedPart>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Complete { parts } => Some(parts),
                _ => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl UploadTransport for StubTransport {
    async fn start_upload(&self, request: &StartUpload) -> Result<UploadId, TransportError> {
        self.record(Call::Start {
            filename: request.filename.clone(),
        });
        match &self.start_failure {
            Some(e) => Err(e.clone()),
            None => Ok(UploadId::from(UPLOAD_ID)),
        }
    }

    async fn upload_part(
        &self,
        _filename: &str,
        _upload_id: &UploadId,
        part_number: PartNumber,
        body: Bytes,
    ) -> Result<ETag, TransportError> {
        let n = part_number.get();
        self.record(Call::UploadPart {
            part_number: n,
            len: body.len(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some((trigger, token)) = &self.cancel_on_part {
            if *trigger == n {
                token.cancel();
            }
        }
        let delay = self.part_delays.get(&n).copied().unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let failure = self
            .part_failures
            .lock()
            .unwrap()
            .get_mut(&n)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(e) => Err(e),
            None => Ok(ETag::from(format!("e{n}"))),
        }
    }

    async fn complete_upload(&self, request: &CompleteUpload) -> Result<ObjectRef, TransportError> {
        self.record(Call::Complete {
            parts: request.parts.clone(),
        });
        let failure = self.complete_failures.lock().unwrap().pop_front();
        match failure {
            Some(e) => Err(e),
            None => Ok(ObjectRef::from(format!("objects/{}", request.filename))),
        }
    }
}
