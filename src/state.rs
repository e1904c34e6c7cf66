//! Application state: the connection pool and every service built on it

use crate::cache::VisibleModulesCache;
use crate::config::Config;
use crate::domain::{Clock, SystemClock};
use crate::repository::assignment::AssignmentRepositoryImpl;
use crate::repository::hierarchy::HierarchyRepositoryImpl;
use crate::repository::permission::PermissionSnapshotRepositoryImpl;
use crate::repository::role_grant::RoleGrantRepositoryImpl;
use crate::repository::subscription::SubscriptionRepositoryImpl;
use crate::repository::unit_role::UnitRoleRepositoryImpl;
use crate::repository::DbPool;
use crate::service::{
    AssignmentService, HierarchyService, PermissionResolver, RoleGrantService, SubscriptionGate,
    SubscriptionService, UnitRoleService,
};
use anyhow::Result;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Production wiring over MySQL.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: DbPool,
    pub hierarchy_service: Arc<HierarchyService<HierarchyRepositoryImpl>>,
    pub role_grant_service: Arc<RoleGrantService<RoleGrantRepositoryImpl>>,
    pub unit_role_service: Arc<UnitRoleService<UnitRoleRepositoryImpl>>,
    pub assignment_service: Arc<AssignmentService<AssignmentRepositoryImpl, HierarchyRepositoryImpl>>,
    pub subscription_gate: Arc<SubscriptionGate<SubscriptionRepositoryImpl>>,
    pub subscription_service: Arc<SubscriptionService<SubscriptionRepositoryImpl>>,
    pub permission_resolver:
        Arc<PermissionResolver<PermissionSnapshotRepositoryImpl, SubscriptionRepositoryImpl>>,
}

impl AppState {
    /// Open the pool and build the services.
    pub async fn connect(config: Config) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
            .connect(&config.database.url)
            .await?;

        info!(
            max_connections = config.database.max_connections,
            "Connected to database"
        );
        Ok(Self::from_pool(config, pool))
    }

    pub fn from_pool(config: Config, pool: MySqlPool) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(VisibleModulesCache::new(config.access.cache_ttl()));

        let hierarchy_repo = Arc::new(HierarchyRepositoryImpl::new(pool.clone()));
        let subscription_repo = Arc::new(SubscriptionRepositoryImpl::new(pool.clone()));

        let subscription_gate = Arc::new(SubscriptionGate::new(
            subscription_repo.clone(),
            cache.clone(),
            clock.clone(),
        ));
        let subscription_service = Arc::new(SubscriptionService::new(
            subscription_repo,
            cache,
            clock,
        ));
        let permission_resolver = Arc::new(PermissionResolver::new(
            Arc::new(PermissionSnapshotRepositoryImpl::new(pool.clone())),
            subscription_gate.clone(),
        ));

        Self {
            hierarchy_service: Arc::new(HierarchyService::new(
                hierarchy_repo.clone(),
                config.access.max_hierarchy_depth,
            )),
            role_grant_service: Arc::new(RoleGrantService::new(Arc::new(
                RoleGrantRepositoryImpl::new(pool.clone()),
            ))),
            unit_role_service: Arc::new(UnitRoleService::new(Arc::new(
                UnitRoleRepositoryImpl::new(pool.clone()),
            ))),
            assignment_service: Arc::new(AssignmentService::new(
                Arc::new(AssignmentRepositoryImpl::new(pool.clone())),
                hierarchy_repo,
            )),
            subscription_gate,
            subscription_service,
            permission_resolver,
            db_pool: DbPool::new(pool),
            config: Arc::new(config),
        }
    }
}
