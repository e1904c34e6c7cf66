//! Subscription plans, subscriptions and plan-gated module lookups

use crate::domain::{
    CreateSubscriptionInput, IncludedModules, Module, PaymentStatus, StringUuid, Subscription,
    SubscriptionPlan, SubscriptionStatus,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

/// Status change applied by `update_lifecycle`
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleChange {
    /// Status the row must still have; guards against a concurrent transition
    pub expected_status: SubscriptionStatus,
    pub new_status: SubscriptionStatus,
    pub end_date: Option<DateTime<Utc>>,
    pub payment_status: Option<PaymentStatus>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Active modules whose tier is NULL or basic
    async fn list_basic_modules(&self) -> Result<Vec<StringUuid>>;
    /// Active modules included in any plan the company currently subscribes to
    async fn list_included_modules(
        &self,
        company_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<IncludedModules>;
    async fn find_module(&self, id: StringUuid) -> Result<Option<Module>>;
    async fn list_modules(&self) -> Result<Vec<Module>>;

    async fn company_exists(&self, company_id: StringUuid) -> Result<bool>;
    async fn find_plan(&self, id: StringUuid) -> Result<Option<SubscriptionPlan>>;
    async fn create(&self, input: &CreateSubscriptionInput) -> Result<Subscription>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<Subscription>>;
    async fn list_by_company(&self, company_id: StringUuid) -> Result<Vec<Subscription>>;
    async fn update_lifecycle(&self, id: StringUuid, change: &LifecycleChange) -> Result<Subscription>;
    /// Move every active subscription whose end date has passed to expired
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub struct SubscriptionRepositoryImpl {
    pool: MySqlPool,
}

impl SubscriptionRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str =
    "id, company_id, plan_id, status, payment_status, start_date, end_date, created_at, updated_at";

const MODULE_COLUMNS: &str =
    "id, code, name, category, parent_id, subscription_tier, sort_order, is_active";

#[async_trait]
impl SubscriptionRepository for SubscriptionRepositoryImpl {
    async fn list_basic_modules(&self) -> Result<Vec<StringUuid>> {
        let ids = sqlx::query_scalar::<_, StringUuid>(
            r#"
            SELECT id FROM modules
            WHERE is_active = TRUE
              AND (subscription_tier IS NULL OR LOWER(subscription_tier) = 'basic')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_included_modules(
        &self,
        company_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<IncludedModules> {
        let rows = sqlx::query_as::<_, (StringUuid, DateTime<Utc>)>(
            r#"
            SELECT m.id, MIN(s.end_date)
            FROM subscriptions s
            JOIN plan_modules pm ON pm.plan_id = s.plan_id AND pm.is_included = TRUE
            JOIN modules m ON m.id = pm.module_id AND m.is_active = TRUE
            WHERE s.company_id = ? AND s.status = 'active' AND s.end_date > ?
            GROUP BY m.id
            "#,
        )
        .bind(company_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let valid_until = rows.iter().map(|(_, end_date)| *end_date).min();
        let modules = rows.into_iter().map(|(id, _)| id).collect();
        Ok(IncludedModules::new(modules, valid_until))
    }

    async fn find_module(&self, id: StringUuid) -> Result<Option<Module>> {
        let sql = format!("SELECT {} FROM modules WHERE id = ?", MODULE_COLUMNS);
        let module = sqlx::query_as::<_, Module>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(module)
    }

    async fn list_modules(&self) -> Result<Vec<Module>> {
        let sql = format!(
            "SELECT {} FROM modules ORDER BY category, sort_order, name",
            MODULE_COLUMNS
        );
        let modules = sqlx::query_as::<_, Module>(&sql).fetch_all(&self.pool).await?;
        Ok(modules)
    }

    async fn company_exists(&self, company_id: StringUuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies WHERE id = ?")
            .bind(company_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn find_plan(&self, id: StringUuid) -> Result<Option<SubscriptionPlan>> {
        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT id, name, price_monthly, price_yearly, is_active FROM subscription_plans WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(plan)
    }

    async fn create(&self, input: &CreateSubscriptionInput) -> Result<Subscription> {
        let id = StringUuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, company_id, plan_id, status, payment_status, start_date, end_date, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(StringUuid::from(input.company_id))
        .bind(StringUuid::from(input.plan_id))
        .bind(SubscriptionStatus::Active)
        .bind(PaymentStatus::Pending)
        .bind(input.start_date)
        .bind(input.end_date)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create subscription")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<Subscription>> {
        let sql = format!("SELECT {} FROM subscriptions WHERE id = ?", SUBSCRIPTION_COLUMNS);
        let subscription = sqlx::query_as::<_, Subscription>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(subscription)
    }

    async fn list_by_company(&self, company_id: StringUuid) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE company_id = ? ORDER BY start_date DESC, id",
            SUBSCRIPTION_COLUMNS
        );
        let subscriptions = sqlx::query_as::<_, Subscription>(&sql)
            .bind(company_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(subscriptions)
    }

    async fn update_lifecycle(&self, id: StringUuid, change: &LifecycleChange) -> Result<Subscription> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = ?,
                end_date = COALESCE(?, end_date),
                payment_status = COALESCE(?, payment_status),
                updated_at = NOW()
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(change.new_status)
        .bind(change.end_date)
        .bind(change.payment_status)
        .bind(id)
        .bind(change.expected_status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(id).await? {
                Some(current) => Err(AppError::Conflict(format!(
                    "Subscription {} is {}, expected {}",
                    id, current.status, change.expected_status
                ))),
                None => Err(AppError::NotFound(format!("Subscription {} not found", id))),
            };
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", id)))
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = 'expired', updated_at = NOW() WHERE status = 'active' AND end_date <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
