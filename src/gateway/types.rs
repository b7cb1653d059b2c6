//! Request/response shapes shared by the gateway and its transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Detail used for every transport-level failure.
pub const NETWORK_ERROR_DETAIL: &str = "Network error";
/// Detail used when a request needs a credential and none is available.
pub const AUTH_REQUIRED_DETAIL: &str = "Authentication required";
/// Status of a request that failed to encode and was never sent.
pub const REQUEST_ENCODING_STATUS: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Sets a header, replacing any earlier value under the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A buffered response as returned by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Successful outcome of a gateway request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse<T> {
    /// 2xx with a decoded body.
    Body(T),
    /// 204, or a 2xx with an empty body.
    NoContent,
}

impl<T> ApiResponse<T> {
    pub fn into_body(self) -> Option<T> {
        match self {
            ApiResponse::Body(body) => Some(body),
            ApiResponse::NoContent => None,
        }
    }
}

/// Normalized error shape. Callers never see transport or decode errors in
/// any other form.
///
/// `status == 0` marks a transport failure and [`REQUEST_ENCODING_STATUS`] a
/// request body that could not be encoded. Every other status was reported
/// by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{detail} (status {status})")]
pub struct ApiError {
    pub detail: String,
    pub status: u16,
}

impl ApiError {
    pub fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            status,
        }
    }

    pub fn network() -> Self {
        Self::new(0, NETWORK_ERROR_DETAIL)
    }

    pub fn authentication_required() -> Self {
        Self::new(401, AUTH_REQUIRED_DETAIL)
    }

    pub fn request_encoding(err: impl fmt::Display) -> Self {
        Self::new(REQUEST_ENCODING_STATUS, format!("Failed to encode request body: {}", err))
    }

    pub fn is_network(&self) -> bool {
        self.status == 0
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn is_request_encoding(&self) -> bool {
        self.status == REQUEST_ENCODING_STATUS
    }

    /// Builds the error for a non-success response, preferring the server's
    /// `detail` or `message` field and falling back to the status line.
    pub fn from_response(status: u16, status_text: &str, body: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct ErrorBody {
            #[serde(default)]
            detail: Option<Value>,
            #[serde(default)]
            message: Option<Value>,
        }

        let decoded = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.detail.and_then(detail_text).or_else(|| b.message.and_then(detail_text)));

        let detail = decoded.unwrap_or_else(|| {
            let reason = status_text.trim();
            if reason.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("{} {}", status, reason)
            }
        });
        Self::new(status, detail)
    }
}

/// Flattens a `detail` value. Validation errors arrive as a list of objects
/// carrying a `msg` field.
fn detail_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Array(items) => {
            let messages: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    other => other.get("msg").and_then(Value::as_str).map(String::from),
                })
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("msg"))
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}
