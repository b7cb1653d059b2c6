//! Request gateway.
//!
//! Single path for every backend call. Attaches the bearer credential,
//! serializes JSON bodies and normalizes every failure into [`ApiError`].
//! Nothing here retries; retry policy belongs to the caller.

pub mod transport;
pub mod types;
pub mod ureq_transport;

pub use transport::{ChunkSource, HttpTransport, StreamResponse};
pub use types::{ApiError, ApiResponse, HttpMethod, HttpRequest, HttpResponse};
pub use ureq_transport::UreqTransport;

use crate::auth::CredentialManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Upper bound on how much of a failed stream response is read to find its
/// error detail.
const MAX_STREAM_ERROR_BODY: usize = 64 * 1024;

pub struct RequestGateway {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialManager>,
}

impl RequestGateway {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<CredentialManager>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    fn url(&self, endpoint: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if endpoint.starts_with('/') {
            format!("{}{}", base, endpoint)
        } else {
            format!("{}/{}", base, endpoint)
        }
    }

    /// Builds the outbound request, attaching the bearer credential when
    /// `requires_auth` is set. Fails without touching the network when no
    /// credential is available.
    async fn build_request(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
        requires_auth: bool,
    ) -> Result<HttpRequest, ApiError> {
        let mut request = HttpRequest::new(method, self.url(endpoint))
            .with_header("Accept", "application/json");

        if let Some(body) = body {
            let bytes = serde_json::to_vec(&body)
                .map_err(ApiError::request_encoding)?;
            request = request
                .with_header("Content-Type", "application/json")
                .with_body(bytes);
        }

        if requires_auth {
            let Some(credential) = self.credentials.get_token().await else {
                tracing::debug!(%method, endpoint, "No credential available, request not sent");
                return Err(ApiError::authentication_required());
            };
            request = request.with_header("Authorization", credential.bearer_header());
        }

        Ok(request)
    }

    /// Sends one request and decodes a successful JSON body into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
        requires_auth: bool,
    ) -> Result<ApiResponse<T>, ApiError> {
        let request = self.build_request(endpoint, method, body, requires_auth).await?;

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%method, endpoint, error = %format!("{:#}", e), "Request failed at transport level");
                return Err(ApiError::network());
            }
        };
        tracing::debug!(%method, endpoint, status = response.status, "Request completed");

        decode_response(response)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        requires_auth: bool,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request(endpoint, HttpMethod::Get, None, requires_auth).await
    }

    /// POSTs `body` as JSON. `None` sends an empty body.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(ApiError::request_encoding)?;
        self.request(endpoint, HttpMethod::Post, body, true).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<ApiResponse<T>, ApiError> {
        self.request(endpoint, HttpMethod::Delete, None, true).await
    }

    /// Opens a `text/event-stream` GET. The credential is attached once, at
    /// connect time.
    ///
    /// A non-success status is read, closed and normalized like any other
    /// failed request.
    pub async fn open_stream(&self, endpoint: &str) -> Result<Box<dyn ChunkSource>, ApiError> {
        let request = self
            .build_request(endpoint, HttpMethod::Get, None, true)
            .await?
            .with_header("Accept", "text/event-stream")
            .with_header("Cache-Control", "no-cache");

        let StreamResponse {
            status,
            status_text,
            mut chunks,
        } = match self.transport.open_stream(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(endpoint, error = %format!("{:#}", e), "Stream connection failed");
                return Err(ApiError::network());
            }
        };
        tracing::debug!(endpoint, status, "Stream opened");

        if (200..300).contains(&status) {
            return Ok(chunks);
        }

        let mut body = Vec::new();
        while body.len() < MAX_STREAM_ERROR_BODY {
            match chunks.next_chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) | Err(_) => break,
            }
        }
        chunks.close();
        Err(ApiError::from_response(status, &status_text, &body))
    }
}

fn decode_response<T: DeserializeOwned>(response: HttpResponse) -> Result<ApiResponse<T>, ApiError> {
    if !response.is_success() {
        return Err(ApiError::from_response(
            response.status,
            &response.status_text,
            &response.body,
        ));
    }

    if response.status == 204 || response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ApiResponse::NoContent);
    }

    serde_json::from_slice::<T>(&response.body)
        .map(ApiResponse::Body)
        .map_err(|e| {
            tracing::warn!(status = response.status, error = %e, "Response body did not match expected shape");
            ApiError::new(response.status, "Invalid response body")
        })
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
