//! Pull-based progress stream over the gateway's streamed GET.

use super::event::{ProgressEvent, ProgressFrame};
use super::frame::FrameDecoder;
use crate::error::ClientError;
use crate::gateway::{ApiResponse, ChunkSource, RequestGateway};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Identifier of a long-running analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    fn progress_endpoint(&self) -> String {
        format!("/api/analysis/progress/{}", self.0)
    }

    fn status_endpoint(&self) -> String {
        format!("/api/analysis/job/{}", self.0)
    }

    fn cancel_endpoint(&self) -> String {
        format!("/api/analysis/{}/cancel", self.0)
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobHandle {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Server acknowledgement of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CancelReceipt {
    #[serde(alias = "analysis_id")]
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

pub struct ProgressReader {
    gateway: Arc<RequestGateway>,
}

impl ProgressReader {
    pub fn new(gateway: Arc<RequestGateway>) -> Self {
        Self { gateway }
    }

    /// Returns a lazy stream of the job's progress.
    ///
    /// Nothing is sent until the first `next()`. The credential is attached
    /// once, when the connection opens; a stream that outlives it is not
    /// re-authenticated and must be reopened with a new `subscribe` call.
    pub fn subscribe(&self, job: &JobHandle) -> ProgressStream {
        ProgressStream {
            job: job.clone(),
            state: StreamState::Pending(Arc::clone(&self.gateway)),
            decoder: FrameDecoder::new(),
            queued: VecDeque::new(),
            last_percent: None,
        }
    }

    /// One-shot status poll, used to resume after the stream was lost.
    pub async fn job_status(&self, job: &JobHandle) -> Result<ProgressEvent, ClientError> {
        let response = self
            .gateway
            .get::<ProgressFrame>(&job.status_endpoint(), true)
            .await?;
        match response {
            ApiResponse::Body(frame) => frame
                .into_event()
                .map_err(|e| ClientError::ProtocolViolation(format!("{:#}", e))),
            ApiResponse::NoContent => Err(ClientError::ProtocolViolation(
                "Job status response had no body".to_string(),
            )),
        }
    }

    /// Asks the server to stop the job.
    ///
    /// Open streams are left alone: the server marks the job `failed`, which
    /// reaches subscribers as a terminal event and ends their sequence.
    pub async fn cancel(&self, job: &JobHandle) -> Result<CancelReceipt, ClientError> {
        let response = self
            .gateway
            .post::<Value, CancelReceipt>(&job.cancel_endpoint(), None)
            .await?;
        tracing::info!(job_id = %job, "Job cancellation requested");
        Ok(match response {
            ApiResponse::Body(receipt) => receipt,
            ApiResponse::NoContent => CancelReceipt {
                job_id: job.id().to_string(),
                status: "cancelled".to_string(),
                message: None,
            },
        })
    }
}

enum StreamState {
    Pending(Arc<RequestGateway>),
    Open(Box<dyn ChunkSource>),
    Finished,
}

/// Finite, non-restartable sequence of [`ProgressEvent`]s for one job.
///
/// Ends when the server closes the body or a terminal step arrives. A
/// connection error is returned from exactly one `next()` and ends the
/// sequence. The connection is released on every exit path, including
/// `close()` and drop.
pub struct ProgressStream {
    job: JobHandle,
    state: StreamState,
    decoder: FrameDecoder,
    queued: VecDeque<ProgressEvent>,
    last_percent: Option<u8>,
}

impl ProgressStream {
    pub fn job(&self) -> &JobHandle {
        &self.job
    }

    /// True once the sequence has ended for any reason.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, StreamState::Finished) && self.queued.is_empty()
    }

    /// Waits for the next event. `None` means the sequence is over.
    pub async fn next(&mut self) -> Option<Result<ProgressEvent, ClientError>> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(self.accept(event));
            }

            if let StreamState::Pending(gateway) = &self.state {
                let gateway = Arc::clone(gateway);
                match gateway.open_stream(&self.job.progress_endpoint()).await {
                    Ok(chunks) => {
                        tracing::debug!(job_id = %self.job, "Progress stream connected");
                        self.state = StreamState::Open(chunks);
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %self.job, status = e.status, detail = %e.detail, "Progress stream failed to open");
                        self.state = StreamState::Finished;
                        return Some(Err(e.into()));
                    }
                }
                continue;
            }

            let polled = match &mut self.state {
                StreamState::Open(chunks) => chunks.next_chunk().await,
                _ => return None,
            };

            match polled {
                Ok(Some(chunk)) => {
                    let payloads = self.decoder.push(&chunk);
                    self.enqueue(payloads);
                }
                Ok(None) => {
                    tracing::debug!(job_id = %self.job, "Progress stream closed by server");
                    let tail = self.decoder.finish();
                    self.enqueue(tail);
                    self.release();
                }
                Err(e) => {
                    tracing::warn!(job_id = %self.job, error = %format!("{:#}", e), "Progress stream connection error");
                    self.release();
                    self.queued.clear();
                    return Some(Err(ClientError::NetworkFailure(format!("{:#}", e))));
                }
            }
        }
    }

    /// Stops the stream and releases its connection. Idempotent.
    pub fn close(&mut self) {
        self.queued.clear();
        self.release();
    }

    /// Adapts the reader to a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<ProgressEvent, ClientError>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }

    fn enqueue(&mut self, payloads: impl IntoIterator<Item = String>) {
        for payload in payloads {
            match ProgressEvent::from_payload(&payload) {
                Ok(event) => self.queued.push_back(event),
                Err(e) => {
                    tracing::warn!(job_id = %self.job, error = %format!("{:#}", e), "Skipping malformed progress frame");
                }
            }
        }
    }

    /// Enforces non-decreasing percent and ends the stream on terminal steps.
    fn accept(&mut self, event: ProgressEvent) -> Result<ProgressEvent, ClientError> {
        if let Some(last) = self.last_percent {
            if event.percent < last {
                tracing::warn!(job_id = %self.job, last, received = event.percent, "Progress went backwards");
                self.close();
                return Err(ClientError::ProtocolViolation(format!(
                    "progress went from {}% back to {}%",
                    last, event.percent
                )));
            }
        }
        self.last_percent = Some(event.percent);

        if event.is_terminal() {
            tracing::debug!(job_id = %self.job, step = %event.step, "Progress stream reached terminal step");
            self.close();
        }
        Ok(event)
    }

    fn release(&mut self) {
        if let StreamState::Open(mut chunks) = std::mem::replace(&mut self.state, StreamState::Finished) {
            chunks.close();
        }
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "tests/reader_tests.rs"]
mod tests;
