//! Billing wire types and the snapshot built from them.

use crate::error::ClientError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// A countable, plan-limited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Videos,
    Comments,
    AiQuestions,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Videos,
        ResourceKind::Comments,
        ResourceKind::AiQuestions,
    ];

    /// Path segment used by the quota endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Videos => "videos",
            ResourceKind::Comments => "comments",
            ResourceKind::AiQuestions => "ai_questions",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Videos => "video analysis",
            ResourceKind::Comments => "comments per video",
            ResourceKind::AiQuestions => "AI question",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-reported usage of one resource. `remaining` is the server's
/// figure and is never recomputed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
}

/// Usage for every resource plus plan identity and renewal date.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "UsageWire")]
pub struct UsageSnapshot {
    pub videos: ResourceUsage,
    pub comments: ResourceUsage,
    pub ai_questions: ResourceUsage,
    pub plan_id: String,
    pub plan_name: String,
    pub period_start: Option<String>,
    pub period_end: Option<String>,
    pub reset_date: Option<String>,
}

impl UsageSnapshot {
    pub fn get(&self, resource: ResourceKind) -> &ResourceUsage {
        match resource {
            ResourceKind::Videos => &self.videos,
            ResourceKind::Comments => &self.comments,
            ResourceKind::AiQuestions => &self.ai_questions,
        }
    }
}

/// Flat usage shape of `/api/billing/info`.
#[derive(Debug, Deserialize)]
struct UsageWire {
    #[serde(default)]
    videos_used: u64,
    #[serde(default)]
    videos_limit: u64,
    #[serde(default)]
    videos_remaining: u64,
    #[serde(default)]
    ai_questions_used: u64,
    #[serde(default)]
    ai_questions_limit: u64,
    #[serde(default)]
    ai_questions_remaining: u64,
    #[serde(default)]
    comments_per_video_limit: u64,
    #[serde(default)]
    period_start: Option<String>,
    #[serde(default)]
    period_end: Option<String>,
    #[serde(default)]
    reset_date: Option<String>,
    #[serde(default)]
    plan_id: String,
    #[serde(default)]
    plan_name: String,
}

impl From<UsageWire> for UsageSnapshot {
    fn from(wire: UsageWire) -> Self {
        Self {
            videos: ResourceUsage {
                used: wire.videos_used,
                limit: wire.videos_limit,
                remaining: wire.videos_remaining,
            },
            // The comment limit applies per video, so nothing accumulates.
            comments: ResourceUsage {
                used: 0,
                limit: wire.comments_per_video_limit,
                remaining: wire.comments_per_video_limit,
            },
            ai_questions: ResourceUsage {
                used: wire.ai_questions_used,
                limit: wire.ai_questions_limit,
                remaining: wire.ai_questions_remaining,
            },
            plan_id: wire.plan_id,
            plan_name: wire.plan_name,
            period_start: wire.period_start,
            period_end: wire.period_end,
            reset_date: wire.reset_date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Paused,
    Canceled,
    /// Free plan, no paid subscription.
    #[default]
    #[serde(rename = "none")]
    Inactive,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SubscriptionInfo {
    pub plan_id: String,
    #[serde(default)]
    pub plan_name: String,
    #[serde(default)]
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub billing_cycle: String,
    #[serde(default)]
    pub price_formatted: String,
    #[serde(default)]
    pub current_period_end: Option<String>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub scheduled_change: Option<Value>,
    #[serde(default)]
    pub update_payment_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// One purchasable plan as listed by the server.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PlanSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Cents
    #[serde(default)]
    pub price_monthly: u64,
    #[serde(default)]
    pub price_monthly_formatted: Option<String>,
    #[serde(default)]
    pub videos_per_month: u64,
    #[serde(default)]
    pub comments_per_video: u64,
    #[serde(default)]
    pub ai_questions_per_month: u64,
    #[serde(default)]
    pub priority_support: bool,
    #[serde(default)]
    pub custom_integrations: bool,
    #[serde(default)]
    pub unlimited_ai: bool,
}

/// The whole authoritative billing picture, replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BillingState {
    pub subscription: SubscriptionInfo,
    pub usage: UsageSnapshot,
    #[serde(default)]
    pub available_plans: Vec<PlanSummary>,
    #[serde(default)]
    pub features: Map<String, Value>,
}

impl BillingState {
    pub fn plan_id(&self) -> &str {
        &self.subscription.plan_id
    }

    /// Feature flag lookup; absent flags read as off.
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Answer of the quota pre-flight endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub usage_type: ResourceKind,
    pub current: u64,
    pub limit: u64,
    pub remaining: u64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub upgrade_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed(QuotaCheck),
    Exceeded(QuotaCheck),
    /// The check could not reach the server. Neither allow nor block.
    Unknown,
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed(_))
    }

    /// Gates a call site with `?`. `Unknown` is reported as a network
    /// failure; match on the decision directly to treat it differently.
    pub fn into_result(self) -> Result<(), ClientError> {
        match self {
            QuotaDecision::Allowed(_) => Ok(()),
            QuotaDecision::Exceeded(check) => Err(ClientError::QuotaExceeded {
                resource: check.usage_type,
                used: check.current,
                limit: check.limit,
                message: check.message,
            }),
            QuotaDecision::Unknown => Err(ClientError::NetworkFailure(
                "Quota status unknown".to_string(),
            )),
        }
    }
}

impl From<QuotaCheck> for QuotaDecision {
    fn from(check: QuotaCheck) -> Self {
        if check.allowed {
            QuotaDecision::Allowed(check)
        } else {
            QuotaDecision::Exceeded(check)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingCycle::Monthly => f.write_str("monthly"),
            BillingCycle::Yearly => f.write_str("yearly"),
        }
    }
}

/// A requested checkout, held while the overlay is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutIntent {
    pub id: Uuid,
    pub plan_id: String,
    pub billing_cycle: BillingCycle,
    pub requested_at: DateTime<Utc>,
}

impl CheckoutIntent {
    pub fn new(plan_id: impl Into<String>, billing_cycle: BillingCycle) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id: plan_id.into(),
            billing_cycle,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CheckoutRequest<'a> {
    pub plan_id: &'a str,
    pub billing_cycle: BillingCycle,
}

/// Server answer to a checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub price_id: String,
    pub customer_email: String,
    #[serde(default)]
    pub checkout_url: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SyncRequest<'a> {
    pub plan_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<&'a str>,
}

/// Response of the cancel endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CancelOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
