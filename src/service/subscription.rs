//! Subscription gating of module visibility, and the subscription lifecycle

use crate::cache::VisibleModulesCache;
use crate::domain::{
    transition, Clock, CreateSubscriptionInput, PaymentStatus, StringUuid, Subscription,
    SubscriptionEvent,
};
use crate::error::{AppError, Result};
use crate::repository::subscription::LifecycleChange;
use crate::repository::SubscriptionRepository;
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::Validate;

/// Decides which modules a company may see.
pub struct SubscriptionGate<R: SubscriptionRepository> {
    repo: Arc<R>,
    cache: Arc<VisibleModulesCache>,
    clock: Arc<dyn Clock>,
}

impl<R: SubscriptionRepository> SubscriptionGate<R> {
    pub fn new(repo: Arc<R>, cache: Arc<VisibleModulesCache>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, cache, clock }
    }

    /// Basic/untiered modules plus every module the company's current plan includes.
    ///
    /// When the plan lookup yields nothing, or fails, the basic set alone is
    /// returned so the company keeps a usable minimum.
    pub async fn list_visible_modules(&self, company_id: StringUuid) -> Result<HashSet<StringUuid>> {
        if let Some(cached) = self.cache.get(company_id).await {
            debug!(company_id = %company_id, "Visible modules served from cache");
            return Ok(cached);
        }

        let now = self.clock.now();
        let mut visible: HashSet<StringUuid> =
            self.repo.list_basic_modules().await?.into_iter().collect();

        // Some(max_age) when the result may be cached
        let cache_for = match self.repo.list_included_modules(company_id, now).await {
            Ok(included) if !included.is_empty() => {
                visible.extend(included.modules);
                // the entry must not outlive the first plan that lapses
                Some(
                    included
                        .valid_until
                        .map(|end| (end - now).to_std().unwrap_or(Duration::ZERO)),
                )
            }
            Ok(_) => {
                warn!(
                    company_id = %company_id,
                    "No active plan modules for company, falling back to basic tier"
                );
                metrics::record_subscription_fallback();
                Some(None)
            }
            Err(e) => {
                warn!(
                    company_id = %company_id,
                    error = %e,
                    "Plan module lookup failed, falling back to basic tier"
                );
                metrics::record_subscription_fallback();
                None
            }
        };

        if let Some(max_age) = cache_for {
            self.cache.put(company_id, visible.clone(), max_age).await;
        }
        Ok(visible)
    }

    pub async fn is_module_visible(&self, company_id: StringUuid, module_id: StringUuid) -> Result<bool> {
        let module = self
            .repo
            .find_module(module_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Module {} not found", module_id)))?;

        if !module.is_active {
            return Ok(false);
        }
        if module.is_ungated() {
            return Ok(true);
        }
        Ok(self.list_visible_modules(company_id).await?.contains(&module_id))
    }
}

/// Subscription state transitions.
pub struct SubscriptionService<R: SubscriptionRepository> {
    repo: Arc<R>,
    cache: Arc<VisibleModulesCache>,
    clock: Arc<dyn Clock>,
}

impl<R: SubscriptionRepository> SubscriptionService<R> {
    pub fn new(repo: Arc<R>, cache: Arc<VisibleModulesCache>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, cache, clock }
    }

    pub async fn create(&self, input: CreateSubscriptionInput) -> Result<Subscription> {
        input.validate()?;

        let company_id = StringUuid::from(input.company_id);
        if !self.repo.company_exists(company_id).await? {
            return Err(AppError::NotFound(format!("Company {} not found", company_id)));
        }
        let plan = self
            .repo
            .find_plan(input.plan_id.into())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Plan {} not found", input.plan_id)))?;
        if !plan.is_active {
            return Err(AppError::BadRequest(format!("Plan {} is not active", plan.id)));
        }

        let subscription = self.repo.create(&input).await?;
        self.cache.invalidate(company_id).await;
        info!(
            subscription_id = %subscription.id,
            company_id = %company_id,
            plan_id = %plan.id,
            "Created subscription"
        );
        Ok(subscription)
    }

    pub async fn get(&self, id: StringUuid) -> Result<Subscription> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", id)))
    }

    pub async fn list_for_company(&self, company_id: StringUuid) -> Result<Vec<Subscription>> {
        self.repo.list_by_company(company_id).await
    }

    pub async fn cancel(&self, id: StringUuid) -> Result<Subscription> {
        let current = self.get(id).await?;
        let next = transition(current.status, SubscriptionEvent::Cancel)?;

        let updated = self
            .repo
            .update_lifecycle(
                id,
                &LifecycleChange {
                    expected_status: current.status,
                    new_status: next,
                    end_date: None,
                    payment_status: None,
                },
            )
            .await?;
        self.cache.invalidate(updated.company_id).await;
        info!(subscription_id = %id, company_id = %updated.company_id, "Cancelled subscription");
        Ok(updated)
    }

    /// Reactivate the same row with a new end date; payment goes back to pending.
    pub async fn renew(&self, id: StringUuid, new_end_date: DateTime<Utc>) -> Result<Subscription> {
        let current = self.get(id).await?;
        let next = transition(current.status, SubscriptionEvent::Renew)?;

        if new_end_date <= self.clock.now() || new_end_date <= current.start_date {
            return Err(AppError::Validation(format!(
                "Renewal end date {} must be in the future and after the start date",
                new_end_date
            )));
        }

        let updated = self
            .repo
            .update_lifecycle(
                id,
                &LifecycleChange {
                    expected_status: current.status,
                    new_status: next,
                    end_date: Some(new_end_date),
                    payment_status: Some(PaymentStatus::Pending),
                },
            )
            .await?;
        self.cache.invalidate(updated.company_id).await;
        info!(
            subscription_id = %id,
            company_id = %updated.company_id,
            end_date = %new_end_date,
            "Renewed subscription"
        );
        Ok(updated)
    }

    /// Idempotent sweep: active subscriptions past their end date become expired.
    pub async fn expire_overdue(&self) -> Result<u64> {
        let now = self.clock.now();
        let expired = self.repo.expire_overdue(now).await?;
        metrics::record_expired_subscriptions(expired);
        if expired > 0 {
            self.cache.clear().await;
        }
        info!(expired, at = %now, "Subscription expiry sweep finished");
        Ok(expired)
    }
}
