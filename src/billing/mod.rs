//! Billing and quota reconciliation against the backend and the external
//! payment widget.

pub mod checkout;
pub mod price;
pub mod reconciler;
pub mod types;

pub use checkout::{
    CheckoutCustomer, CheckoutEvent, CheckoutEventDispatcher, CheckoutEventSender, CheckoutItem,
    CheckoutWidget,
};
pub use price::PriceReference;
pub use reconciler::BillingReconciler;
pub use types::{
    BillingCycle, BillingState, CancelOutcome, CheckoutIntent, CheckoutSession, PlanSummary,
    QuotaCheck, QuotaDecision, ResourceKind, ResourceUsage, SubscriptionInfo, SubscriptionStatus,
    UsageSnapshot,
};
