//! Client-side session and data-access core.
//!
//! - [`auth`]: renewable bearer credential with background renewal and an
//!   expiry watchdog
//! - [`gateway`]: authenticated JSON-over-HTTP with normalized errors
//! - [`progress`]: job progress over a `text/event-stream` connection
//! - [`billing`]: usage snapshot, quota checks and checkout reconciliation
//! - [`client`]: the [`Session`] wiring them together

pub mod auth;
pub mod billing;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod progress;
mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use client::Session;
pub use config::ClientConfig;
pub use error::ClientError;
