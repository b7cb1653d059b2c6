//! Renewable credential cache with background renewal and expiry watchdog.

use super::credential::Credential;
use super::provider::{Clock, IdentityProvider};
use crate::config::AuthConfig;
use crate::util::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Callback invoked once when the session is found to have truly lapsed.
pub type ExpiredCallback = Arc<dyn Fn() + Send + Sync>;

/// Owns the single live credential of a session.
///
/// Shared state sits behind `std::sync::Mutex` and is never held across an
/// `.await`, so the renewal task, the watchdog and foreground `get_token()`
/// calls can interleave freely on the runtime.
pub struct CredentialManager {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    cached: Mutex<Option<Credential>>,
    activities: Mutex<Option<Activities>>,
    generation: AtomicU64,
}

/// The two periodic tasks plus the callback they share.
struct Activities {
    generation: u64,
    renewal: JoinHandle<()>,
    watchdog: JoinHandle<()>,
    on_expired: Option<ExpiredCallback>,
}

impl Activities {
    fn abort(self) {
        self.renewal.abort();
        self.watchdog.abort();
    }
}

impl CredentialManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                clock,
                config,
                cached: Mutex::new(None),
                activities: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Starts the renewal and watchdog activities.
    ///
    /// Calling this while already started stops the previous activities and
    /// starts fresh ones with the new callback. Must be called from within a
    /// tokio runtime.
    pub fn start<F>(&self, on_expired: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let previous = lock(&self.inner.activities).take();
        if let Some(previous) = previous {
            tracing::debug!(generation = previous.generation, "Restarting credential activities");
            previous.abort();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let renewal = tokio::spawn(renewal_loop(self.inner.clone()));
        let watchdog = tokio::spawn(watchdog_loop(self.inner.clone(), generation));

        *lock(&self.inner.activities) = Some(Activities {
            generation,
            renewal,
            watchdog,
            on_expired: Some(Arc::new(on_expired)),
        });
        tracing::info!(generation, "Credential activities started");
    }

    /// Stops both activities and drops the expiry callback.
    ///
    /// Idempotent, and safe to call from inside the expiry callback.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// True while the background activities are running.
    pub fn is_running(&self) -> bool {
        lock(&self.inner.activities).is_some()
    }

    /// Returns a credential valid for at least the safety margin, renewing
    /// first when the cached one is too close to expiry.
    ///
    /// When the identity provider is unreachable, a cached credential that has
    /// not yet expired is still returned. An expired one never is.
    pub async fn get_token(&self) -> Option<Credential> {
        self.inner.get_token().await
    }

    /// Forces a renewal against the identity provider.
    ///
    /// On provider failure the cached credential is left untouched and `None`
    /// is returned.
    pub async fn refresh_token(&self) -> Option<Credential> {
        match self.inner.renew(true).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(error = %e, "Forced credential refresh failed");
                None
            }
        }
    }

    /// Pure expiry check of the cached credential against the clock.
    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// The cached credential as-is, without any renewal.
    pub fn current(&self) -> Option<Credential> {
        self.inner.current()
    }

    /// Stops the activities and discards the cached credential.
    pub fn sign_out(&self) {
        self.inner.stop();
        *lock(&self.inner.cached) = None;
        tracing::info!("Credential discarded on sign-out");
    }
}

impl Drop for CredentialManager {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl Inner {
    fn current(&self) -> Option<Credential> {
        lock(&self.cached).clone()
    }

    fn is_valid(&self) -> bool {
        let now = self.clock.now();
        lock(&self.cached)
            .as_ref()
            .is_some_and(|credential| !credential.is_expired_at(now))
    }

    fn stop(&self) {
        let activities = lock(&self.activities).take();
        if let Some(activities) = activities {
            tracing::info!(generation = activities.generation, "Credential activities stopped");
            activities.abort();
        }
    }

    /// Tears down the activities of `generation` and hands back the callback.
    /// Returns `None` if they were already stopped or restarted.
    fn take_for_expiry(&self, generation: u64) -> Option<ExpiredCallback> {
        let mut guard = lock(&self.activities);
        if guard.as_ref().map(|a| a.generation) != Some(generation) {
            return None;
        }
        let activities = guard.take()?;
        drop(guard);

        // The watchdog is the caller and exits on its own.
        activities.renewal.abort();
        activities.on_expired
    }

    async fn get_token(&self) -> Option<Credential> {
        let margin = self.config.safety_margin();
        let cached = self.current();
        if let Some(credential) = &cached {
            if credential.is_fresh_at(self.clock.now(), margin) {
                return cached;
            }
        }

        // Nothing cached yet: the provider's current token may be good enough.
        let mut renewed = self.renew(cached.is_some()).await;
        if cached.is_none() {
            if let Ok(Some(credential)) = &renewed {
                if !credential.is_fresh_at(self.clock.now(), margin) {
                    renewed = self.renew(true).await;
                }
            }
        }

        match renewed {
            Ok(Some(credential)) if !credential.is_expired_at(self.clock.now()) => Some(credential),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Credential renewal failed, falling back to cached token");
                self.current()
                    .filter(|credential| !credential.is_expired_at(self.clock.now()))
            }
        }
    }

    /// Fetches a credential from the provider and caches it if it is newer
    /// than the one already cached. Returns the newest cached credential.
    async fn renew(&self, force_refresh: bool) -> anyhow::Result<Option<Credential>> {
        let fetched = self.provider.id_token_result(force_refresh).await?;

        let Some(credential) = fetched else {
            let had_credential = lock(&self.cached).take().is_some();
            if had_credential {
                tracing::info!("Identity provider reports no signed-in user, credential discarded");
            }
            return Ok(None);
        };

        let now = self.clock.now();
        if credential.is_expired_at(now) {
            tracing::warn!(expires_at = %credential.expires_at(), "Identity provider returned an expired credential");
            return Ok(self.current().filter(|c| !c.is_expired_at(now)));
        }

        Ok(Some(self.store_if_newer(credential)))
    }

    /// Replaces the cached credential only with one that expires later, so a
    /// slow renewal can never overwrite a fresher result.
    fn store_if_newer(&self, credential: Credential) -> Credential {
        let mut cached = lock(&self.cached);
        match cached.as_ref() {
            Some(existing) if existing.expires_at() >= credential.expires_at() => {
                tracing::debug!(
                    kept = %existing.expires_at(),
                    discarded = %credential.expires_at(),
                    "Ignoring renewal result older than cached credential"
                );
                existing.clone()
            }
            _ => {
                tracing::debug!(expires_at = %credential.expires_at(), "Cached renewed credential");
                *cached = Some(credential.clone());
                credential
            }
        }
    }
}

async fn renewal_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.renewal_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick fires immediately and only primes the cache.
    let mut force_refresh = false;
    loop {
        interval.tick().await;
        if let Err(e) = inner.renew(force_refresh).await {
            // Log but don't fail - the next tick retries and the watchdog
            // decides whether the session is really gone.
            tracing::warn!(error = %e, "Background credential renewal failed");
        }
        force_refresh = true;
    }
}

async fn watchdog_loop(inner: Arc<Inner>, generation: u64) {
    let period = inner.config.watchdog_interval();
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut strikes = 0u32;
    loop {
        interval.tick().await;

        if !inner.is_valid() {
            // Recover from the provider's own session before counting a strike.
            if let Err(e) = inner.renew(false).await {
                tracing::debug!(error = %e, "Watchdog recovery attempt failed");
            }
        }

        if inner.is_valid() {
            strikes = 0;
            continue;
        }

        strikes += 1;
        tracing::warn!(strikes, limit = inner.config.expiry_strikes, "Credential is not valid");
        if strikes >= inner.config.expiry_strikes {
            if let Some(on_expired) = inner.take_for_expiry(generation) {
                tracing::info!("Session expired");
                on_expired();
            }
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/manager_tests.rs"]
mod tests;
