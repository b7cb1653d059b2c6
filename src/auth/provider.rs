//! Identity provider boundary and wall-clock abstraction.

use super::credential::Credential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The external service that mints bearer credentials.
///
/// `Ok(None)` means nobody is signed in. `Err` means the provider could not
/// be reached or refused the renewal; the caller keeps whatever it had.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the current token together with its expiry and claims,
    /// renewing it first when `force_refresh` is set.
    async fn id_token_result(&self, force_refresh: bool) -> anyhow::Result<Option<Credential>>;

    /// Returns only the token text.
    async fn id_token(&self, force_refresh: bool) -> anyhow::Result<Option<String>> {
        Ok(self
            .id_token_result(force_refresh)
            .await?
            .map(|credential| credential.token().to_string()))
    }
}

/// Source of wall-clock time for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
