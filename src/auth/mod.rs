//! Credential management.
//!
//! This module owns the single renewable bearer credential of a session:
//! - Caches the credential in memory only
//! - Renews it in the background ahead of expiry
//! - Runs an expiry watchdog that declares the session lapsed after
//!   repeated failed checks

pub mod credential;
pub mod manager;
pub mod provider;

pub use credential::Credential;
pub use manager::{CredentialManager, ExpiredCallback};
pub use provider::{Clock, IdentityProvider, SystemClock};
