//! Payment widget seam and its process-wide event channel.

use crate::error::ClientError;
use crate::util::lock;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub const EVENT_CHECKOUT_COMPLETED: &str = "checkout.completed";
pub const EVENT_CHECKOUT_CLOSED: &str = "checkout.closed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutItem {
    pub price_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutCustomer {
    pub email: String,
}

/// The externally rendered payment widget.
///
/// Its completion signal does not come back through these calls; the host
/// forwards the widget's event callback into a [`CheckoutEventSender`].
#[async_trait]
pub trait CheckoutWidget: Send + Sync {
    /// One-time script load followed by the widget's own initialization.
    async fn load_and_initialize(&self) -> anyhow::Result<()>;

    /// Opens the overlay and returns once it is shown.
    async fn open_checkout_overlay(
        &self,
        items: Vec<CheckoutItem>,
        customer: CheckoutCustomer,
        metadata: Map<String, Value>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutEvent {
    Completed { transaction_id: Option<String> },
    Closed,
    /// Any other widget event, kept by name for logging.
    Other(String),
}

impl CheckoutEvent {
    /// Maps a widget event name and its optional data payload.
    pub fn from_widget(name: &str, data: Option<&Value>) -> Self {
        match name {
            EVENT_CHECKOUT_COMPLETED => CheckoutEvent::Completed {
                transaction_id: data
                    .and_then(|d| d.get("transaction_id"))
                    .and_then(Value::as_str)
                    .map(String::from),
            },
            EVENT_CHECKOUT_CLOSED => CheckoutEvent::Closed,
            other => CheckoutEvent::Other(other.to_string()),
        }
    }
}

/// Single channel between the widget callback and the reconciler.
///
/// Any number of senders; the receiver can be taken once.
pub struct CheckoutEventDispatcher {
    tx: mpsc::UnboundedSender<CheckoutEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<CheckoutEvent>>>,
}

impl CheckoutEventDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn sender(&self) -> CheckoutEventSender {
        CheckoutEventSender {
            tx: self.tx.clone(),
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.rx).is_none()
    }

    pub(crate) fn take_receiver(&self) -> Result<mpsc::UnboundedReceiver<CheckoutEvent>, ClientError> {
        lock(&self.rx).take().ok_or(ClientError::AlreadyAttached)
    }
}

impl Default for CheckoutEventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct CheckoutEventSender {
    tx: mpsc::UnboundedSender<CheckoutEvent>,
}

impl CheckoutEventSender {
    /// Returns false once the subscriber is gone.
    pub fn emit(&self, event: CheckoutEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Forwards a raw widget callback.
    pub fn emit_named(&self, name: &str, data: Option<&Value>) -> bool {
        self.emit(CheckoutEvent::from_widget(name, data))
    }
}

#[cfg(test)]
#[path = "tests/checkout_tests.rs"]
mod tests;
