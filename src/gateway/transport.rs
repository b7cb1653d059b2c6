//! Network seam of the gateway.

use super::types::{HttpRequest, HttpResponse};
use async_trait::async_trait;

/// Sends requests over the wire. Errors returned here are transport-level
/// (DNS, refused connection, timeout); HTTP error statuses are successful
/// responses from the transport's point of view.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and buffers the whole response body.
    async fn send(&self, request: HttpRequest) -> anyhow::Result<HttpResponse>;

    /// Sends a request and returns as soon as the status line is known,
    /// leaving the body to be pulled chunk by chunk.
    async fn open_stream(&self, request: HttpRequest) -> anyhow::Result<StreamResponse>;
}

/// A streamed response whose body has not been read yet.
pub struct StreamResponse {
    pub status: u16,
    pub status_text: String,
    pub chunks: Box<dyn ChunkSource>,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .finish()
    }
}

/// Raw body chunks of an open streamed response, in arrival order.
///
/// Chunk boundaries are arbitrary and carry no meaning.
#[async_trait]
pub trait ChunkSource: Send {
    /// Waits for the next chunk. `Ok(None)` means the server closed the body.
    async fn next_chunk(&mut self) -> anyhow::Result<Option<Vec<u8>>>;

    /// Releases the underlying connection. Idempotent; after it returns,
    /// `next_chunk` yields `Ok(None)`.
    fn close(&mut self);
}
