//! Composition root tying the components to one signed-in identity.

use crate::auth::{Clock, CredentialManager, IdentityProvider, SystemClock};
use crate::billing::{BillingReconciler, CheckoutEventDispatcher, CheckoutWidget};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gateway::{HttpTransport, RequestGateway, UreqTransport};
use crate::progress::ProgressReader;
use anyhow::{Context, Result};
use std::sync::Arc;

/// One signed-in identity and everything that works on its behalf.
///
/// The credential manager, its renewal and watchdog activities and the
/// checkout event subscription live and die together.
pub struct Session {
    credentials: Arc<CredentialManager>,
    gateway: Arc<RequestGateway>,
    progress: ProgressReader,
    billing: BillingReconciler,
    checkout_events: CheckoutEventDispatcher,
}

impl Session {
    /// Builds a session over the production `ureq` transport.
    pub fn new(
        config: &ClientConfig,
        provider: Arc<dyn IdentityProvider>,
        widget: Arc<dyn CheckoutWidget>,
    ) -> Result<Self> {
        Self::with_parts(
            config,
            provider,
            widget,
            Arc::new(UreqTransport::new(&config.http)),
            Arc::new(SystemClock),
        )
    }

    /// Fails when `config` does not pass [`ClientConfig::validate`].
    pub fn with_parts(
        config: &ClientConfig,
        provider: Arc<dyn IdentityProvider>,
        widget: Arc<dyn CheckoutWidget>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().context("Invalid client config")?;

        let credentials = Arc::new(CredentialManager::new(
            provider,
            clock,
            config.auth.clone(),
        ));
        let gateway = Arc::new(RequestGateway::new(
            config.api_base_url.clone(),
            transport,
            Arc::clone(&credentials),
        ));

        Ok(Self {
            progress: ProgressReader::new(Arc::clone(&gateway)),
            billing: BillingReconciler::new(Arc::clone(&gateway), widget, config.billing.clone()),
            checkout_events: CheckoutEventDispatcher::new(),
            credentials,
            gateway,
        })
    }

    /// Starts credential renewal and subscribes the reconciler to checkout
    /// events. `on_expired` runs once if the identity lapses for good.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&self, on_expired: F) -> Result<(), ClientError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.credentials.start(on_expired);
        if self.checkout_events.is_attached() {
            self.billing.resume_events();
        } else {
            self.billing.attach_events(&self.checkout_events)?;
        }
        tracing::info!("Session started");
        Ok(())
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    pub fn progress(&self) -> &ProgressReader {
        &self.progress
    }

    pub fn billing(&self) -> &BillingReconciler {
        &self.billing
    }

    /// Where the host forwards the payment widget's event callback.
    pub fn checkout_events(&self) -> &CheckoutEventDispatcher {
        &self.checkout_events
    }

    /// Stops every background activity. The cached credential is kept.
    pub fn shutdown(&self) {
        self.credentials.stop();
        self.billing.shutdown();
        tracing::info!("Session shut down");
    }

    /// Stops everything and discards the credential and billing cache.
    pub fn sign_out(&self) {
        self.billing.shutdown();
        self.billing.invalidate();
        self.credentials.sign_out();
        tracing::info!("Signed out");
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
