//! Default (role, module) grant matrix repository

use super::{existing_module_ids, finish_transaction};
use crate::domain::{Role, RoleModuleGrant, StringUuid};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::{MySqlConnection, MySqlPool};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleGrantRepository: Send + Sync {
    async fn find_role(&self, id: StringUuid) -> Result<Option<Role>>;
    /// The subset of `module_ids` present in the module catalogue
    async fn find_existing_modules(&self, module_ids: &[StringUuid]) -> Result<Vec<StringUuid>>;
    async fn find_grants(&self, role_id: StringUuid) -> Result<Vec<RoleModuleGrant>>;
    /// Delete every grant of the role and insert `grants`, atomically.
    async fn replace_grants(&self, role_id: StringUuid, grants: &[RoleModuleGrant]) -> Result<()>;
}

pub struct RoleGrantRepositoryImpl {
    pool: MySqlPool,
}

impl RoleGrantRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

async fn replace_in_tx(
    conn: &mut MySqlConnection,
    role_id: StringUuid,
    grants: &[RoleModuleGrant],
) -> Result<()> {
    // concurrent replacements of the same role queue up behind this lock
    let role: Option<StringUuid> = sqlx::query_scalar("SELECT id FROM roles WHERE id = ? FOR UPDATE")
        .bind(role_id)
        .fetch_optional(&mut *conn)
        .await?;
    if role.is_none() {
        return Err(AppError::NotFound(format!("Role {} not found", role_id)));
    }

    sqlx::query("DELETE FROM role_modules WHERE role_id = ?")
        .bind(role_id)
        .execute(&mut *conn)
        .await?;

    for grant in grants {
        sqlx::query(
            r#"
            INSERT INTO role_modules (role_id, module_id, can_read, can_write, can_delete)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(role_id)
        .bind(grant.module_id)
        .bind(grant.can_read)
        .bind(grant.can_write)
        .bind(grant.can_delete)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl RoleGrantRepository for RoleGrantRepositoryImpl {
    async fn find_role(&self, id: StringUuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name, is_active FROM roles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn find_existing_modules(&self, module_ids: &[StringUuid]) -> Result<Vec<StringUuid>> {
        existing_module_ids(&self.pool, module_ids).await
    }

    async fn find_grants(&self, role_id: StringUuid) -> Result<Vec<RoleModuleGrant>> {
        let grants = sqlx::query_as::<_, RoleModuleGrant>(
            r#"
            SELECT role_id, module_id, can_read, can_write, can_delete
            FROM role_modules
            WHERE role_id = ?
            ORDER BY module_id
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(grants)
    }

    async fn replace_grants(&self, role_id: StringUuid, grants: &[RoleModuleGrant]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let outcome = replace_in_tx(&mut tx, role_id, grants).await;
        finish_transaction(tx, outcome).await
    }
}
