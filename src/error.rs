//! Client-facing error taxonomy.
//!
//! Transport and decode failures are normalized into [`ApiError`] at the
//! gateway boundary; everything above the gateway speaks [`ClientError`].

use crate::billing::ResourceKind;
use crate::gateway::ApiError;
use thiserror::Error;

/// Errors surfaced to UI-level callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No credential is available, or the backend rejected it.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Transport-level failure (DNS, refused connection, timeout).
    /// Corresponds to a status-0 [`ApiError`].
    #[error("Network error: {0}")]
    NetworkFailure(String),

    /// The request body could not be encoded, so nothing was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Structured error reported by the backend.
    #[error("{detail} (status {status})")]
    Server { status: u16, detail: String },

    /// Malformed or out-of-order data on the progress stream.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A well-formed "not allowed" answer from a quota check.
    #[error("Quota exceeded for {resource}: {used}/{limit}")]
    QuotaExceeded {
        resource: ResourceKind,
        used: u64,
        limit: u64,
        message: Option<String>,
    },

    /// The payment widget has not finished its one-time initialization.
    #[error("Checkout is not ready yet")]
    CheckoutNotReady,

    /// The server handed back a price reference the widget would reject.
    #[error("Invalid price reference: {0:?}")]
    InvalidPriceReference(String),

    /// The payment widget failed to load or to open its overlay.
    #[error("Checkout failed: {0}")]
    CheckoutFailed(String),

    /// The checkout event receiver was already taken by another subscriber.
    #[error("Checkout events are already attached")]
    AlreadyAttached,
}

impl ClientError {
    /// Returns true when repeating the same action later can succeed
    /// without the user changing anything (signing in again counts).
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::AuthenticationRequired
            | ClientError::NetworkFailure(_)
            | ClientError::CheckoutNotReady
            | ClientError::CheckoutFailed(_) => true,
            ClientError::Server { status, .. } => *status >= 500 || *status == 429,
            ClientError::InvalidRequest(_)
            | ClientError::ProtocolViolation(_)
            | ClientError::QuotaExceeded { .. }
            | ClientError::InvalidPriceReference(_)
            | ClientError::AlreadyAttached => false,
        }
    }

    /// Returns true when the right response is an upgrade prompt.
    pub fn requires_upgrade(&self) -> bool {
        matches!(self, ClientError::QuotaExceeded { .. })
    }

    /// Human-readable message suitable for showing next to a failed action.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::AuthenticationRequired => {
                "Your session has expired. Please sign in again and retry.".to_string()
            }
            ClientError::NetworkFailure(_) => {
                "We couldn't reach the server. Check your connection and try again.".to_string()
            }
            ClientError::InvalidRequest(_) => {
                "Something went wrong preparing this request. Please contact support.".to_string()
            }
            ClientError::Server { detail, .. } => detail.clone(),
            ClientError::ProtocolViolation(_) => {
                "Progress updates were interrupted. Reload to see the latest status.".to_string()
            }
            ClientError::QuotaExceeded {
                resource,
                limit,
                message,
                ..
            } => message.clone().unwrap_or_else(|| {
                format!(
                    "You've reached your {} limit ({}). Upgrade your plan to continue.",
                    resource.label(),
                    limit
                )
            }),
            ClientError::CheckoutNotReady => {
                "Checkout is still loading. Please try again shortly.".to_string()
            }
            ClientError::CheckoutFailed(_) => {
                "Checkout couldn't be opened. Please try again.".to_string()
            }
            ClientError::InvalidPriceReference(_) => {
                "This plan can't be purchased right now. Please contact support.".to_string()
            }
            ClientError::AlreadyAttached => "Checkout is already in progress.".to_string(),
        }
    }
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        if err.is_network() {
            ClientError::NetworkFailure(err.detail)
        } else if err.is_unauthorized() {
            ClientError::AuthenticationRequired
        } else if err.is_request_encoding() {
            ClientError::InvalidRequest(err.detail)
        } else {
            ClientError::Server {
                status: err.status,
                detail: err.detail,
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
