//! Billing state cache and post-checkout reconciliation.
//!
//! The server is the only source of truth. Nothing here updates billing
//! state optimistically; after a checkout completes the reconciler waits a
//! fixed grace interval for the payment webhook to land and then reloads
//! everything once.

use super::checkout::{
    CheckoutCustomer, CheckoutEvent, CheckoutEventDispatcher, CheckoutItem, CheckoutWidget,
};
use super::price::PriceReference;
use super::types::{
    BillingCycle, BillingState, CancelOutcome, CheckoutIntent, CheckoutRequest, CheckoutSession,
    PlanSummary, QuotaCheck, QuotaDecision, ResourceKind, SyncRequest, UsageSnapshot,
};
use crate::config::BillingConfig;
use crate::error::ClientError;
use crate::gateway::{ApiResponse, RequestGateway};
use crate::util::lock;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const BILLING_INFO_ENDPOINT: &str = "/api/billing/info";
const PLANS_ENDPOINT: &str = "/api/billing/plans";
const CHECKOUT_ENDPOINT: &str = "/api/billing/checkout";
const SYNC_ENDPOINT: &str = "/api/billing/sync-subscription";

struct CachedState {
    state: BillingState,
    fetched_at: Instant,
}

pub struct BillingReconciler {
    inner: Arc<Inner>,
}

struct Inner {
    gateway: Arc<RequestGateway>,
    widget: Arc<dyn CheckoutWidget>,
    config: BillingConfig,
    cached: Mutex<Option<CachedState>>,
    widget_ready: AtomicBool,
    widget_init: tokio::sync::Mutex<()>,
    pending: Mutex<Option<CheckoutIntent>>,
    last_completed: Mutex<Option<CheckoutIntent>>,
    events_rx: Mutex<Option<SharedReceiver>>,
    events_task: Mutex<Option<JoinHandle<()>>>,
}

/// Survives the listening task being aborted, so listening can resume.
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<CheckoutEvent>>>;

impl BillingReconciler {
    pub fn new(
        gateway: Arc<RequestGateway>,
        widget: Arc<dyn CheckoutWidget>,
        config: BillingConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                widget,
                config,
                cached: Mutex::new(None),
                widget_ready: AtomicBool::new(false),
                widget_init: tokio::sync::Mutex::new(()),
                pending: Mutex::new(None),
                last_completed: Mutex::new(None),
                events_rx: Mutex::new(None),
                events_task: Mutex::new(None),
            }),
        }
    }

    /// Last fetched billing state, without any I/O.
    pub fn snapshot(&self) -> Option<BillingState> {
        lock(&self.inner.cached).as_ref().map(|c| c.state.clone())
    }

    pub fn usage(&self) -> Option<UsageSnapshot> {
        lock(&self.inner.cached).as_ref().map(|c| c.state.usage.clone())
    }

    /// Returns the cached state while it is younger than the cache TTL,
    /// otherwise fetches a new one.
    pub async fn refresh(&self) -> Result<BillingState, ClientError> {
        let ttl = self.inner.config.cache_ttl();
        let fresh = lock(&self.inner.cached)
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < ttl)
            .map(|c| c.state.clone());
        if let Some(state) = fresh {
            return Ok(state);
        }
        self.inner.force_refresh().await
    }

    /// Fetches a new snapshot regardless of the cache.
    pub async fn force_refresh(&self) -> Result<BillingState, ClientError> {
        self.inner.force_refresh().await
    }

    /// The window regained focus; state may have changed elsewhere.
    pub async fn on_window_focus(&self) -> Result<BillingState, ClientError> {
        tracing::debug!("Window focused, reloading billing state");
        self.inner.force_refresh().await
    }

    /// Drops the cache age so the next `refresh()` goes to the server.
    pub fn invalidate(&self) {
        lock(&self.inner.cached).take();
    }

    /// Pre-flight quota check. Never changes local state.
    ///
    /// A transport failure yields [`QuotaDecision::Unknown`]; server and
    /// authentication errors are returned as errors.
    pub async fn check_quota(
        &self,
        resource: ResourceKind,
        amount: u64,
    ) -> Result<QuotaDecision, ClientError> {
        let endpoint = format!("/api/billing/quota/{}?amount={}", resource.as_str(), amount);
        match self.inner.gateway.get::<QuotaCheck>(&endpoint, true).await {
            Ok(ApiResponse::Body(check)) => {
                tracing::debug!(%resource, amount, allowed = check.allowed, remaining = check.remaining, "Quota checked");
                Ok(QuotaDecision::from(check))
            }
            Ok(ApiResponse::NoContent) => Err(empty_body(&endpoint)),
            Err(e) if e.is_network() => {
                tracing::warn!(%resource, "Quota check could not reach the server");
                Ok(QuotaDecision::Unknown)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Public plan list.
    pub async fn plans(&self) -> Result<Vec<PlanSummary>, ClientError> {
        match self.inner.gateway.get::<Vec<PlanSummary>>(PLANS_ENDPOINT, false).await? {
            ApiResponse::Body(plans) => Ok(plans),
            ApiResponse::NoContent => Ok(Vec::new()),
        }
    }

    /// Runs the widget's one-time load and initialize handshake.
    /// Later calls return immediately.
    pub async fn initialize_widget(&self) -> Result<(), ClientError> {
        let _guard = self.inner.widget_init.lock().await;
        if self.is_widget_ready() {
            return Ok(());
        }
        self.inner.widget.load_and_initialize().await.map_err(|e| {
            tracing::warn!(error = %format!("{:#}", e), "Checkout widget failed to initialize");
            ClientError::CheckoutFailed(format!("{:#}", e))
        })?;
        self.mark_widget_ready();
        Ok(())
    }

    /// For hosts that initialize the widget themselves.
    pub fn mark_widget_ready(&self) {
        if !self.inner.widget_ready.swap(true, Ordering::SeqCst) {
            tracing::info!("Checkout widget ready");
        }
    }

    pub fn is_widget_ready(&self) -> bool {
        self.inner.widget_ready.load(Ordering::SeqCst)
    }

    /// The intent completion will be attributed to, if any.
    pub fn pending_checkout(&self) -> Option<CheckoutIntent> {
        lock(&self.inner.pending).clone()
    }

    /// Intent of the most recent completed checkout.
    pub fn last_completed_checkout(&self) -> Option<CheckoutIntent> {
        lock(&self.inner.last_completed).clone()
    }

    /// Opens the payment overlay for a plan. Returns once the overlay is
    /// shown; payment completion arrives later as a widget event.
    ///
    /// Fails fast with [`ClientError::CheckoutNotReady`] before the widget
    /// has initialized. A checkout opened while another is pending replaces
    /// it.
    pub async fn open_checkout(
        &self,
        plan_id: &str,
        billing_cycle: BillingCycle,
    ) -> Result<CheckoutIntent, ClientError> {
        if !self.is_widget_ready() {
            return Err(ClientError::CheckoutNotReady);
        }

        let intent = CheckoutIntent::new(plan_id, billing_cycle);
        let request = CheckoutRequest {
            plan_id,
            billing_cycle,
        };
        let session = match self
            .inner
            .gateway
            .post::<_, CheckoutSession>(CHECKOUT_ENDPOINT, Some(&request))
            .await?
        {
            ApiResponse::Body(session) => session,
            ApiResponse::NoContent => return Err(empty_body(CHECKOUT_ENDPOINT)),
        };

        let price = PriceReference::parse(&session.price_id).inspect_err(|_| {
            tracing::warn!(intent_id = %intent.id, price_id = %session.price_id, "Server returned a malformed price reference");
        })?;

        let replaced = lock(&self.inner.pending).replace(intent.clone());
        if let Some(previous) = replaced {
            tracing::info!(previous = %previous.id, current = %intent.id, "Replacing pending checkout");
        }

        let items = vec![CheckoutItem {
            price_id: price.as_str().to_string(),
            quantity: 1,
        }];
        let customer = CheckoutCustomer {
            email: session.customer_email.clone(),
        };
        let mut metadata = Map::new();
        metadata.insert("plan_id".to_string(), Value::String(intent.plan_id.clone()));
        metadata.insert(
            "billing_cycle".to_string(),
            Value::String(billing_cycle.to_string()),
        );
        metadata.insert("intent_id".to_string(), Value::String(intent.id.to_string()));

        if let Err(e) = self
            .inner
            .widget
            .open_checkout_overlay(items, customer, metadata)
            .await
        {
            let mut pending = lock(&self.inner.pending);
            if pending.as_ref().map(|p| p.id) == Some(intent.id) {
                *pending = None;
            }
            drop(pending);
            tracing::warn!(intent_id = %intent.id, error = %format!("{:#}", e), "Checkout overlay failed to open");
            return Err(ClientError::CheckoutFailed(format!("{:#}", e)));
        }

        tracing::info!(intent_id = %intent.id, plan_id = %intent.plan_id, cycle = %billing_cycle, "Checkout overlay opened");
        Ok(intent)
    }

    /// Subscribes to the widget's event channel. Only one subscription per
    /// dispatcher is allowed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach_events(&self, dispatcher: &CheckoutEventDispatcher) -> Result<(), ClientError> {
        let rx = dispatcher.take_receiver()?;
        *lock(&self.inner.events_rx) = Some(Arc::new(tokio::sync::Mutex::new(rx)));
        self.resume_events();
        Ok(())
    }

    /// Restarts listening after [`shutdown`](Self::shutdown). No-op when
    /// already listening or never attached.
    pub fn resume_events(&self) {
        let Some(rx) = lock(&self.inner.events_rx).clone() else {
            return;
        };
        let mut task = lock(&self.inner.events_task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(event_loop(Arc::clone(&self.inner), rx)));
        tracing::debug!("Listening for checkout events");
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.inner.events_task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels the subscription, then reloads billing state.
    pub async fn cancel_subscription(&self, at_period_end: bool) -> Result<CancelOutcome, ClientError> {
        let endpoint = format!("/api/billing/cancel?at_period_end={}", at_period_end);
        let outcome = match self
            .inner
            .gateway
            .post::<(), CancelOutcome>(&endpoint, None)
            .await?
        {
            ApiResponse::Body(outcome) => outcome,
            ApiResponse::NoContent => CancelOutcome {
                success: true,
                message: None,
            },
        };
        tracing::info!(at_period_end, "Subscription cancelled");

        if let Err(e) = self.inner.force_refresh().await {
            tracing::warn!(error = %e, "Billing reload after cancel failed");
        }
        Ok(outcome)
    }

    /// Manual fallback asking the server to apply a finished checkout when
    /// the webhook never arrived. Never called automatically.
    pub async fn sync_subscription(
        &self,
        plan_id: &str,
        transaction_id: Option<&str>,
    ) -> Result<BillingState, ClientError> {
        let request = SyncRequest {
            plan_id,
            transaction_id,
        };
        match self
            .inner
            .gateway
            .post::<_, BillingState>(SYNC_ENDPOINT, Some(&request))
            .await?
        {
            ApiResponse::Body(state) => {
                tracing::info!(plan_id, "Subscription synced manually");
                self.inner.store(state.clone());
                Ok(state)
            }
            ApiResponse::NoContent => Err(empty_body(SYNC_ENDPOINT)),
        }
    }

    /// Stops listening for widget events.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.inner.events_task).take() {
            handle.abort();
        }
    }
}

impl Drop for BillingReconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    async fn force_refresh(&self) -> Result<BillingState, ClientError> {
        match self
            .gateway
            .get::<BillingState>(BILLING_INFO_ENDPOINT, true)
            .await?
        {
            ApiResponse::Body(state) => {
                tracing::debug!(plan_id = %state.plan_id(), "Billing state refreshed");
                self.store(state.clone());
                Ok(state)
            }
            ApiResponse::NoContent => Err(empty_body(BILLING_INFO_ENDPOINT)),
        }
    }

    fn store(&self, state: BillingState) {
        *lock(&self.cached) = Some(CachedState {
            state,
            fetched_at: Instant::now(),
        });
    }

    async fn handle_event(&self, event: CheckoutEvent) {
        match event {
            CheckoutEvent::Completed { transaction_id } => {
                let intent = lock(&self.pending).take();
                match &intent {
                    Some(intent) => tracing::info!(
                        intent_id = %intent.id,
                        plan_id = %intent.plan_id,
                        transaction_id = transaction_id.as_deref().unwrap_or("-"),
                        "Checkout completed, waiting for webhook"
                    ),
                    None => tracing::info!(
                        transaction_id = transaction_id.as_deref().unwrap_or("-"),
                        "Checkout completed with no pending intent"
                    ),
                }
                if let Some(intent) = intent {
                    *lock(&self.last_completed) = Some(intent);
                }

                tokio::time::sleep(self.config.checkout_grace()).await;
                match self.force_refresh().await {
                    Ok(state) => {
                        tracing::info!(plan_id = %state.plan_id(), "Billing state reloaded after checkout")
                    }
                    Err(e) => tracing::warn!(error = %e, "Billing reload after checkout failed"),
                }
            }
            CheckoutEvent::Closed => {
                if let Some(intent) = lock(&self.pending).take() {
                    tracing::info!(intent_id = %intent.id, "Checkout closed without completing");
                }
            }
            CheckoutEvent::Other(name) => {
                tracing::debug!(event = %name, "Ignoring checkout event");
            }
        }
    }
}

async fn event_loop(inner: Arc<Inner>, rx: SharedReceiver) {
    let mut rx = rx.lock().await;
    while let Some(event) = rx.recv().await {
        inner.handle_event(event).await;
    }
    tracing::debug!("Checkout event channel closed");
}

fn empty_body(endpoint: &str) -> ClientError {
    ClientError::Server {
        status: 204,
        detail: format!("{} returned no content", endpoint),
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
