//! Consistent read of everything permission resolution needs for one user

use crate::domain::{
    Module, Role, RoleModuleGrant, StringUuid, UnitRoleLink, UnitRoleModuleOverride,
    UserRoleAssignment,
};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::MySqlPool;
use std::collections::HashMap;

/// Grants, overrides and references for one user's assignments, read together.
///
/// Rows referenced by an assignment but missing here (role, unit) were absent
/// from the store at read time.
#[derive(Debug, Clone, Default)]
pub struct PermissionSnapshot {
    pub assignments: Vec<UserRoleAssignment>,
    pub roles: HashMap<StringUuid, Role>,
    /// unit id -> is_active
    pub units: HashMap<StringUuid, bool>,
    /// (unit id, role id) -> link id
    pub links: HashMap<(StringUuid, StringUuid), StringUuid>,
    /// role id -> default grants
    pub grants: HashMap<StringUuid, Vec<RoleModuleGrant>>,
    /// link id -> overrides
    pub overrides: HashMap<StringUuid, Vec<UnitRoleModuleOverride>>,
    pub modules: HashMap<StringUuid, Module>,
}

impl PermissionSnapshot {
    /// Index flat row sets the way the resolver looks them up.
    pub fn from_rows(
        assignments: Vec<UserRoleAssignment>,
        roles: Vec<Role>,
        units: Vec<(StringUuid, bool)>,
        links: Vec<UnitRoleLink>,
        grants: Vec<RoleModuleGrant>,
        overrides: Vec<UnitRoleModuleOverride>,
        modules: Vec<Module>,
    ) -> Self {
        let mut grants_by_role: HashMap<StringUuid, Vec<RoleModuleGrant>> = HashMap::new();
        for grant in grants {
            grants_by_role.entry(grant.role_id).or_default().push(grant);
        }
        let mut overrides_by_link: HashMap<StringUuid, Vec<UnitRoleModuleOverride>> = HashMap::new();
        for row in overrides {
            overrides_by_link.entry(row.unit_role_id).or_default().push(row);
        }

        Self {
            assignments,
            roles: roles.into_iter().map(|r| (r.id, r)).collect(),
            units: units.into_iter().collect(),
            links: links
                .into_iter()
                .map(|l| ((l.unit_id, l.role_id), l.id))
                .collect(),
            grants: grants_by_role,
            overrides: overrides_by_link,
            modules: modules.into_iter().map(|m| (m.id, m)).collect(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionSnapshotRepository: Send + Sync {
    async fn load_snapshot(&self, user_id: StringUuid) -> Result<PermissionSnapshot>;
}

pub struct PermissionSnapshotRepositoryImpl {
    pool: MySqlPool,
}

impl PermissionSnapshotRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionSnapshotRepository for PermissionSnapshotRepositoryImpl {
    async fn load_snapshot(&self, user_id: StringUuid) -> Result<PermissionSnapshot> {
        // InnoDB's REPEATABLE READ pins every read below to one snapshot
        let mut tx = self.pool.begin().await?;

        let assignments = sqlx::query_as::<_, UserRoleAssignment>(
            r#"
            SELECT id, user_id, role_id, company_id, branch_id, unit_id
            FROM user_roles
            WHERE user_id = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT DISTINCT r.id, r.name, r.is_active
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let units = sqlx::query_as::<_, (StringUuid, bool)>(
            r#"
            SELECT DISTINCT u.id, u.is_active
            FROM units u
            JOIN user_roles ur ON ur.unit_id = u.id
            WHERE ur.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let links = sqlx::query_as::<_, UnitRoleLink>(
            r#"
            SELECT DISTINCT l.id, l.unit_id, l.role_id, l.created_at
            FROM unit_roles l
            JOIN user_roles ur ON ur.unit_id = l.unit_id AND ur.role_id = l.role_id
            WHERE ur.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let grants = sqlx::query_as::<_, RoleModuleGrant>(
            r#"
            SELECT DISTINCT rm.role_id, rm.module_id, rm.can_read, rm.can_write, rm.can_delete
            FROM role_modules rm
            JOIN user_roles ur ON ur.role_id = rm.role_id
            WHERE ur.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let overrides = sqlx::query_as::<_, UnitRoleModuleOverride>(
            r#"
            SELECT DISTINCT o.unit_role_id, o.module_id, o.can_read, o.can_write, o.can_delete, o.can_approve
            FROM unit_role_modules o
            JOIN unit_roles l ON l.id = o.unit_role_id
            JOIN user_roles ur ON ur.unit_id = l.unit_id AND ur.role_id = l.role_id
            WHERE ur.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let modules = sqlx::query_as::<_, Module>(
            "SELECT id, code, name, category, parent_id, subscription_tier, sort_order, is_active FROM modules",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PermissionSnapshot::from_rows(
            assignments,
            roles,
            units,
            links,
            grants,
            overrides,
            modules,
        ))
    }
}
