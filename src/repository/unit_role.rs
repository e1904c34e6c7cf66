//! Unit-role links and their module overrides

use super::{conflict_on_duplicate, existing_module_ids, finish_transaction};
use crate::domain::{CopyPermissionsReport, StringUuid, UnitRoleLink, UnitRoleModuleOverride};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::{Executor, MySql, MySqlConnection, MySqlPool};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnitRoleRepository: Send + Sync {
    async fn unit_exists(&self, unit_id: StringUuid) -> Result<bool>;
    async fn role_exists(&self, role_id: StringUuid) -> Result<bool>;
    async fn find_existing_modules(&self, module_ids: &[StringUuid]) -> Result<Vec<StringUuid>>;

    async fn exists_by_unit_and_role(&self, unit_id: StringUuid, role_id: StringUuid) -> Result<bool>;
    async fn create_link(&self, unit_id: StringUuid, role_id: StringUuid) -> Result<UnitRoleLink>;
    async fn find_link_by_id(&self, id: StringUuid) -> Result<Option<UnitRoleLink>>;
    async fn find_links_by_unit(&self, unit_id: StringUuid) -> Result<Vec<UnitRoleLink>>;
    /// Delete a link together with its overrides.
    async fn delete_link(&self, id: StringUuid) -> Result<()>;

    async fn find_overrides(&self, unit_role_id: StringUuid) -> Result<Vec<UnitRoleModuleOverride>>;
    /// Delete every override of the link and insert `overrides`, atomically.
    async fn replace_overrides(
        &self,
        unit_role_id: StringUuid,
        overrides: &[UnitRoleModuleOverride],
    ) -> Result<()>;
    /// Copy the source unit's overrides for `role_id` onto the target unit.
    async fn copy_permissions(
        &self,
        source_unit_id: StringUuid,
        target_unit_id: StringUuid,
        role_id: StringUuid,
        overwrite_existing: bool,
    ) -> Result<CopyPermissionsReport>;
}

pub struct UnitRoleRepositoryImpl {
    pool: MySqlPool,
}

impl UnitRoleRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

async fn fetch_link<'e, E>(
    executor: E,
    unit_id: StringUuid,
    role_id: StringUuid,
    lock: bool,
) -> Result<Option<UnitRoleLink>>
where
    E: Executor<'e, Database = MySql>,
{
    let sql = if lock {
        "SELECT id, unit_id, role_id, created_at FROM unit_roles WHERE unit_id = ? AND role_id = ? FOR UPDATE"
    } else {
        "SELECT id, unit_id, role_id, created_at FROM unit_roles WHERE unit_id = ? AND role_id = ?"
    };
    let link = sqlx::query_as::<_, UnitRoleLink>(sql)
        .bind(unit_id)
        .bind(role_id)
        .fetch_optional(executor)
        .await?;
    Ok(link)
}

async fn fetch_overrides<'e, E>(executor: E, unit_role_id: StringUuid) -> Result<Vec<UnitRoleModuleOverride>>
where
    E: Executor<'e, Database = MySql>,
{
    let overrides = sqlx::query_as::<_, UnitRoleModuleOverride>(
        r#"
        SELECT unit_role_id, module_id, can_read, can_write, can_delete, can_approve
        FROM unit_role_modules
        WHERE unit_role_id = ?
        ORDER BY module_id
        "#,
    )
    .bind(unit_role_id)
    .fetch_all(executor)
    .await?;
    Ok(overrides)
}

async fn insert_override(
    conn: &mut MySqlConnection,
    unit_role_id: StringUuid,
    row: &UnitRoleModuleOverride,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO unit_role_modules (unit_role_id, module_id, can_read, can_write, can_delete, can_approve)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(unit_role_id)
    .bind(row.module_id)
    .bind(row.can_read)
    .bind(row.can_write)
    .bind(row.can_delete)
    .bind(row.can_approve)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn replace_in_tx(
    conn: &mut MySqlConnection,
    unit_role_id: StringUuid,
    overrides: &[UnitRoleModuleOverride],
) -> Result<()> {
    let link: Option<StringUuid> = sqlx::query_scalar("SELECT id FROM unit_roles WHERE id = ? FOR UPDATE")
        .bind(unit_role_id)
        .fetch_optional(&mut *conn)
        .await?;
    if link.is_none() {
        return Err(AppError::NotFound(format!(
            "Unit role link {} not found",
            unit_role_id
        )));
    }

    sqlx::query("DELETE FROM unit_role_modules WHERE unit_role_id = ?")
        .bind(unit_role_id)
        .execute(&mut *conn)
        .await?;
    for row in overrides {
        insert_override(conn, unit_role_id, row).await?;
    }
    Ok(())
}

async fn copy_in_tx(
    conn: &mut MySqlConnection,
    source_unit_id: StringUuid,
    target_unit_id: StringUuid,
    role_id: StringUuid,
    overwrite_existing: bool,
) -> Result<CopyPermissionsReport> {
    let source = fetch_link(&mut *conn, source_unit_id, role_id, false)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Role {} is not linked to unit {}",
                role_id, source_unit_id
            ))
        })?;

    let (target_link_id, link_created) =
        match fetch_link(&mut *conn, target_unit_id, role_id, true).await? {
            Some(link) => (link.id, false),
            None => {
                let id = StringUuid::new_v4();
                sqlx::query(
                    "INSERT INTO unit_roles (id, unit_id, role_id, created_at) VALUES (?, ?, ?, NOW())",
                )
                .bind(id)
                .bind(target_unit_id)
                .bind(role_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    conflict_on_duplicate(
                        e,
                        format!("Role {} was linked to unit {} concurrently", role_id, target_unit_id),
                    )
                })?;
                (id, true)
            }
        };

    if overwrite_existing {
        sqlx::query("DELETE FROM unit_role_modules WHERE unit_role_id = ?")
            .bind(target_link_id)
            .execute(&mut *conn)
            .await?;
    }

    let source_rows = fetch_overrides(&mut *conn, source.id).await?;
    let mut report = CopyPermissionsReport {
        target_link_id,
        link_created,
        copied: 0,
        skipped: 0,
    };

    for row in &source_rows {
        if !overwrite_existing {
            let present: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM unit_role_modules WHERE unit_role_id = ? AND module_id = ?",
            )
            .bind(target_link_id)
            .bind(row.module_id)
            .fetch_one(&mut *conn)
            .await?;
            if present > 0 {
                report.skipped += 1;
                continue;
            }
        }
        insert_override(conn, target_link_id, row).await?;
        report.copied += 1;
    }

    Ok(report)
}

#[async_trait]
impl UnitRoleRepository for UnitRoleRepositoryImpl {
    async fn unit_exists(&self, unit_id: StringUuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units WHERE id = ?")
            .bind(unit_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn role_exists(&self, role_id: StringUuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE id = ?")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn find_existing_modules(&self, module_ids: &[StringUuid]) -> Result<Vec<StringUuid>> {
        existing_module_ids(&self.pool, module_ids).await
    }

    async fn exists_by_unit_and_role(&self, unit_id: StringUuid, role_id: StringUuid) -> Result<bool> {
        Ok(fetch_link(&self.pool, unit_id, role_id, false).await?.is_some())
    }

    async fn create_link(&self, unit_id: StringUuid, role_id: StringUuid) -> Result<UnitRoleLink> {
        let id = StringUuid::new_v4();
        sqlx::query("INSERT INTO unit_roles (id, unit_id, role_id, created_at) VALUES (?, ?, ?, NOW())")
            .bind(id)
            .bind(unit_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                conflict_on_duplicate(
                    e,
                    format!("Role {} is already linked to unit {}", role_id, unit_id),
                )
            })?;

        self.find_link_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create unit role link")))
    }

    async fn find_link_by_id(&self, id: StringUuid) -> Result<Option<UnitRoleLink>> {
        let link = sqlx::query_as::<_, UnitRoleLink>(
            "SELECT id, unit_id, role_id, created_at FROM unit_roles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    async fn find_links_by_unit(&self, unit_id: StringUuid) -> Result<Vec<UnitRoleLink>> {
        let links = sqlx::query_as::<_, UnitRoleLink>(
            "SELECT id, unit_id, role_id, created_at FROM unit_roles WHERE unit_id = ? ORDER BY created_at, id",
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    async fn delete_link(&self, id: StringUuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let outcome: Result<()> = async {
            sqlx::query("DELETE FROM unit_role_modules WHERE unit_role_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM unit_roles WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(AppError::NotFound(format!("Unit role link {} not found", id)));
            }
            Ok(())
        }
        .await;
        finish_transaction(tx, outcome).await
    }

    async fn find_overrides(&self, unit_role_id: StringUuid) -> Result<Vec<UnitRoleModuleOverride>> {
        fetch_overrides(&self.pool, unit_role_id).await
    }

    async fn replace_overrides(
        &self,
        unit_role_id: StringUuid,
        overrides: &[UnitRoleModuleOverride],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let outcome = replace_in_tx(&mut tx, unit_role_id, overrides).await;
        finish_transaction(tx, outcome).await
    }

    async fn copy_permissions(
        &self,
        source_unit_id: StringUuid,
        target_unit_id: StringUuid,
        role_id: StringUuid,
        overwrite_existing: bool,
    ) -> Result<CopyPermissionsReport> {
        let mut tx = self.pool.begin().await?;
        let outcome =
            copy_in_tx(&mut tx, source_unit_id, target_unit_id, role_id, overwrite_existing).await;
        finish_transaction(tx, outcome).await
    }
}
