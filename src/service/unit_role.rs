//! Unit-specific role activation and permission overrides

use super::{ensure_distinct_modules, ensure_modules_found};
use crate::domain::{
    CopyPermissionsReport, OverrideInput, StringUuid, UnitRoleLink, UnitRoleModuleOverride,
};
use crate::error::{AppError, Result};
use crate::repository::UnitRoleRepository;
use std::sync::Arc;
use tracing::info;

pub struct UnitRoleService<R: UnitRoleRepository> {
    repo: Arc<R>,
}

impl<R: UnitRoleRepository> UnitRoleService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    async fn require_unit(&self, unit_id: StringUuid) -> Result<()> {
        if !self.repo.unit_exists(unit_id).await? {
            return Err(AppError::NotFound(format!("Unit {} not found", unit_id)));
        }
        Ok(())
    }

    async fn require_role(&self, role_id: StringUuid) -> Result<()> {
        if !self.repo.role_exists(role_id).await? {
            return Err(AppError::NotFound(format!("Role {} not found", role_id)));
        }
        Ok(())
    }

    async fn require_link(&self, link_id: StringUuid) -> Result<UnitRoleLink> {
        self.repo
            .find_link_by_id(link_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Unit role link {} not found", link_id)))
    }

    /// Activate a role for a unit.
    pub async fn link(&self, unit_id: StringUuid, role_id: StringUuid) -> Result<UnitRoleLink> {
        self.require_unit(unit_id).await?;
        self.require_role(role_id).await?;

        if self.repo.exists_by_unit_and_role(unit_id, role_id).await? {
            return Err(AppError::Conflict(format!(
                "Role {} is already linked to unit {}",
                role_id, unit_id
            )));
        }

        let link = self.repo.create_link(unit_id, role_id).await?;
        info!(unit_id = %unit_id, role_id = %role_id, link_id = %link.id, "Linked role to unit");
        Ok(link)
    }

    /// Deactivate a role for a unit, dropping its overrides.
    pub async fn unlink(&self, unit_id: StringUuid, role_id: StringUuid) -> Result<()> {
        let link = self
            .repo
            .find_links_by_unit(unit_id)
            .await?
            .into_iter()
            .find(|link| link.role_id == role_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Role {} is not linked to unit {}", role_id, unit_id))
            })?;

        self.repo.delete_link(link.id).await?;
        info!(unit_id = %unit_id, role_id = %role_id, "Unlinked role from unit");
        Ok(())
    }

    pub async fn list_links(&self, unit_id: StringUuid) -> Result<Vec<UnitRoleLink>> {
        self.repo.find_links_by_unit(unit_id).await
    }

    pub async fn get_overrides(&self, link_id: StringUuid) -> Result<Vec<UnitRoleModuleOverride>> {
        self.require_link(link_id).await?;
        self.repo.find_overrides(link_id).await
    }

    /// Replace the link's whole override set; either every row lands or none does.
    pub async fn replace_overrides(
        &self,
        link_id: StringUuid,
        overrides: Vec<OverrideInput>,
    ) -> Result<Vec<UnitRoleModuleOverride>> {
        self.require_link(link_id).await?;

        let module_ids: Vec<StringUuid> = overrides.iter().map(|o| o.module_id.into()).collect();
        ensure_distinct_modules(&module_ids)?;
        let found = self.repo.find_existing_modules(&module_ids).await?;
        ensure_modules_found(&module_ids, &found)?;

        let rows: Vec<UnitRoleModuleOverride> = overrides
            .into_iter()
            .map(|o| UnitRoleModuleOverride {
                unit_role_id: link_id,
                module_id: o.module_id.into(),
                can_read: o.can_read,
                can_write: o.can_write,
                can_delete: o.can_delete,
                can_approve: o.can_approve,
            })
            .collect();

        self.repo.replace_overrides(link_id, &rows).await?;
        info!(link_id = %link_id, overrides = rows.len(), "Replaced unit role overrides");
        Ok(rows)
    }

    /// Copy `role_id`'s overrides from one unit onto another.
    ///
    /// The target link is created when missing. Without `overwrite_existing`
    /// modules the target already overrides are left alone.
    pub async fn copy_permissions(
        &self,
        source_unit_id: StringUuid,
        target_unit_id: StringUuid,
        role_id: StringUuid,
        overwrite_existing: bool,
    ) -> Result<CopyPermissionsReport> {
        if source_unit_id == target_unit_id {
            return Err(AppError::BadRequest(
                "Source and target unit must differ".to_string(),
            ));
        }
        self.require_unit(target_unit_id).await?;
        self.require_role(role_id).await?;

        let report = self
            .repo
            .copy_permissions(source_unit_id, target_unit_id, role_id, overwrite_existing)
            .await?;
        info!(
            source_unit_id = %source_unit_id,
            target_unit_id = %target_unit_id,
            role_id = %role_id,
            overwrite_existing,
            copied = report.copied,
            skipped = report.skipped,
            "Copied unit permissions"
        );
        Ok(report)
    }
}
