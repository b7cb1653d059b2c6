//! Blocking `ureq` transport driven from async code.
//!
//! ureq is blocking, so every call runs on tokio's blocking pool. Streamed
//! bodies are pumped from a blocking worker into a bounded channel. Each
//! stream gets its own agent whose connections wait for input in short
//! slices and check a stop flag in between, so closing the stream ends a
//! worker parked on an idle socket and drops the connection.

use super::transport::{ChunkSource, HttpTransport, StreamResponse};
use super::types::{HttpMethod, HttpRequest, HttpResponse};
use crate::config::HttpConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::time::Duration as TransportDuration;
use ureq::unversioned::transport::{
    Buffers, ConnectionDetails, Connector, DefaultConnector, NextTimeout, Transport,
};

const STREAM_READ_BUFFER: usize = 8 * 1024;
const STREAM_CHANNEL_DEPTH: usize = 16;
/// Longest a stream worker stays blocked on the socket before checking
/// whether its consumer went away.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

type UreqResponse = ureq::http::Response<ureq::Body>;

/// Production transport backed by `ureq`: one shared agent with a
/// whole-request timeout for plain calls, and a per-stream agent with only a
/// connect timeout for long-lived streams.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    stream_config: ureq::config::Config,
}

impl UreqTransport {
    pub fn new(config: &HttpConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .http_status_as_error(false)
            .build()
            .into();
        let stream_config = ureq::Agent::config_builder()
            .timeout_connect(Some(config.stream_connect_timeout()))
            .http_status_as_error(false)
            .max_idle_connections(0)
            .build();

        Self {
            agent,
            stream_config,
        }
    }

    fn stream_agent(&self, stop: Arc<AtomicBool>) -> ureq::Agent {
        ureq::Agent::with_parts(
            self.stream_config.clone(),
            StoppableConnector {
                inner: DefaultConnector::new(),
                stop,
            },
            DefaultResolver::default(),
        )
    }
}

#[async_trait]
impl HttpTransport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || {
            let mut response = execute(&agent, request)?;
            let status = response.status();
            let body = response
                .body_mut()
                .read_to_vec()
                .context("Failed to read response body")?;
            Ok(HttpResponse {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            })
        })
        .await
        .context("HTTP worker task failed")?
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamResponse> {
        let stop = Arc::new(AtomicBool::new(false));
        let agent = self.stream_agent(Arc::clone(&stop));
        let (head_tx, head_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_CHANNEL_DEPTH);

        let worker_stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || pump_stream(&agent, request, &worker_stop, head_tx, chunk_tx));

        let chunks = ChannelChunks {
            rx: Some(chunk_rx),
            stop,
        };
        let (status, status_text) = head_rx.await.context("Stream worker exited before responding")??;
        Ok(StreamResponse {
            status,
            status_text,
            chunks: Box::new(chunks),
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn execute(agent: &ureq::Agent, request: HttpRequest) -> Result<UreqResponse> {
    let HttpRequest {
        method,
        url,
        headers,
        body,
    } = request;

    let result = match method {
        HttpMethod::Get => with_headers(agent.get(&url), &headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(&url), &headers).call(),
        HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => {
            let builder = match method {
                HttpMethod::Put => agent.put(&url),
                HttpMethod::Patch => agent.patch(&url),
                _ => agent.post(&url),
            };
            let builder = with_headers(builder, &headers);
            match body {
                Some(bytes) => builder.send(&bytes[..]),
                None => builder.send_empty(),
            }
        }
    };

    result.with_context(|| format!("{} {} failed", method, url))
}

fn pump_stream(
    agent: &ureq::Agent,
    request: HttpRequest,
    stop: &AtomicBool,
    head_tx: oneshot::Sender<Result<(u16, String)>>,
    chunk_tx: mpsc::Sender<Result<Vec<u8>>>,
) {
    let response = match execute(agent, request) {
        Ok(response) => response,
        Err(e) => {
            let _ = head_tx.send(Err(e));
            return;
        }
    };

    let status = response.status();
    let head = (
        status.as_u16(),
        status.canonical_reason().unwrap_or_default().to_string(),
    );
    if head_tx.send(Ok(head)).is_err() {
        return;
    }

    let mut reader = response.into_body().into_reader();
    let mut buf = vec![0u8; STREAM_READ_BUFFER];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if chunk_tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) if stop.load(Ordering::Acquire) => break,
            Err(e) => {
                let _ = chunk_tx.blocking_send(Err(anyhow::Error::new(e).context("Stream read failed")));
                break;
            }
        }
    }
    tracing::debug!(stopped = stop.load(Ordering::Acquire), "Stream worker finished");
}

struct ChannelChunks {
    rx: Option<mpsc::Receiver<Result<Vec<u8>>>>,
    stop: Arc<AtomicBool>,
}

#[async_trait]
impl ChunkSource for ChannelChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(rx) = self.rx.as_mut() else {
            return Ok(None);
        };
        match rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(mut rx) = self.rx.take() {
            rx.close();
        }
    }
}

impl Drop for ChannelChunks {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wraps ureq's default connector so every connection it opens watches
/// `stop`.
#[derive(Debug)]
struct StoppableConnector {
    inner: DefaultConnector,
    stop: Arc<AtomicBool>,
}

impl Connector<()> for StoppableConnector {
    type Out = StoppableTransport;

    fn connect(
        &self,
        details: &ConnectionDetails,
        chained: Option<()>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        let transport = self.inner.connect(details, chained)?;
        Ok(transport.map(|inner| StoppableTransport {
            inner,
            stop: Arc::clone(&self.stop),
        }))
    }
}

#[derive(Debug)]
struct StoppableTransport {
    inner: Box<dyn Transport>,
    stop: Arc<AtomicBool>,
}

impl StoppableTransport {
    fn stopped_error() -> ureq::Error {
        ureq::Error::Io(std::io::Error::other("stream closed by consumer"))
    }
}

impl Transport for StoppableTransport {
    fn buffers(&mut self) -> &mut dyn Buffers {
        self.inner.buffers()
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        self.inner.transmit_output(amount, timeout)
    }

    /// Waits at most [`STOP_POLL_INTERVAL`] per attempt, keeping the
    /// caller's overall deadline.
    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        let started = Instant::now();
        loop {
            if self.stop.load(Ordering::Acquire) {
                return Err(Self::stopped_error());
            }

            let remaining = timeout.after.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(ureq::Error::Timeout(timeout.reason));
            }
            let slice = NextTimeout {
                after: TransportDuration::Exact(remaining.min(STOP_POLL_INTERVAL)),
                reason: timeout.reason,
            };

            match self.inner.await_input(slice) {
                Err(ureq::Error::Timeout(_)) => continue,
                other => return other,
            }
        }
    }

    fn is_open(&mut self) -> bool {
        !self.stop.load(Ordering::Acquire) && self.inner.is_open()
    }

    fn is_tls(&self) -> bool {
        self.inner.is_tls()
    }
}

#[cfg(test)]
#[path = "tests/ureq_transport_tests.rs"]
mod tests;
