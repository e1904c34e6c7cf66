//! Subscription plans and the subscription lifecycle

use super::common::StringUuid;
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            _ => Err(format!("Unknown subscription status: {}", s)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

crate::impl_mysql_text_enum!(SubscriptionStatus);

/// Payment state tracked only as far as renewal needs it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(format!("Unknown payment status: {}", s)),
        }
    }
}

crate::impl_mysql_text_enum!(PaymentStatus);

/// Plan with price tiers
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub id: StringUuid,
    pub name: String,
    pub price_monthly: f64,
    pub price_yearly: f64,
    pub is_active: bool,
}

/// A company's subscription to a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: StringUuid,
    pub company_id: StringUuid,
    pub plan_id: StringUuid,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Active and inside its billing window
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date > now
    }
}

/// Modules a company's current plans include
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncludedModules {
    pub modules: Vec<StringUuid>,
    /// Earliest end date among the subscriptions that contribute a module
    pub valid_until: Option<DateTime<Utc>>,
}

impl IncludedModules {
    pub fn new(modules: Vec<StringUuid>, valid_until: Option<DateTime<Utc>>) -> Self {
        Self {
            modules,
            valid_until,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// (plan, module) inclusion flag
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanModuleInclusion {
    pub plan_id: StringUuid,
    pub module_id: StringUuid,
    pub is_included: bool,
}

/// Input for subscribing a company to a plan
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_billing_window"))]
pub struct CreateSubscriptionInput {
    pub company_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

fn validate_billing_window(
    input: &CreateSubscriptionInput,
) -> std::result::Result<(), validator::ValidationError> {
    if input.end_date > input.start_date {
        Ok(())
    } else {
        Err(validator::ValidationError::new("end_date_before_start_date"))
    }
}

/// Lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// System sweep noticed end_date has passed
    Expire,
    /// Explicit cancellation
    Cancel,
    /// Renewal on the same row
    Renew,
}

/// Next status for `event`, or `Conflict` when the transition is not allowed.
///
/// active -> expired | cancelled; cancelled | expired -> active.
pub fn transition(
    from: SubscriptionStatus,
    event: SubscriptionEvent,
) -> Result<SubscriptionStatus> {
    use SubscriptionEvent::*;
    use SubscriptionStatus::*;

    match (from, event) {
        (Active, Expire) => Ok(Expired),
        (Active, Cancel) => Ok(Cancelled),
        (Cancelled | Expired, Renew) => Ok(Active),
        (from, event) => Err(AppError::Conflict(format!(
            "Cannot apply {:?} to a subscription that is {}",
            event, from
        ))),
    }
}
