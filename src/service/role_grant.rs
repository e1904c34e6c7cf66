//! Default role permission matrix

use super::{ensure_distinct_modules, ensure_modules_found};
use crate::domain::{GrantInput, Role, RoleModuleGrant, StringUuid};
use crate::error::{AppError, Result};
use crate::repository::RoleGrantRepository;
use std::sync::Arc;
use tracing::info;

pub struct RoleGrantService<R: RoleGrantRepository> {
    repo: Arc<R>,
}

impl<R: RoleGrantRepository> RoleGrantService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    async fn require_role(&self, role_id: StringUuid) -> Result<Role> {
        self.repo
            .find_role(role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_id)))
    }

    pub async fn get_grants(&self, role_id: StringUuid) -> Result<Vec<RoleModuleGrant>> {
        self.require_role(role_id).await?;
        self.repo.find_grants(role_id).await
    }

    /// Replace the role's whole grant set; either every row lands or none does.
    pub async fn replace_grants(
        &self,
        role_id: StringUuid,
        grants: Vec<GrantInput>,
    ) -> Result<Vec<RoleModuleGrant>> {
        self.require_role(role_id).await?;

        let module_ids: Vec<StringUuid> = grants.iter().map(|g| g.module_id.into()).collect();
        ensure_distinct_modules(&module_ids)?;
        let found = self.repo.find_existing_modules(&module_ids).await?;
        ensure_modules_found(&module_ids, &found)?;

        let rows: Vec<RoleModuleGrant> = grants
            .into_iter()
            .map(|g| RoleModuleGrant {
                role_id,
                module_id: g.module_id.into(),
                can_read: g.can_read,
                can_write: g.can_write,
                can_delete: g.can_delete,
            })
            .collect();

        self.repo.replace_grants(role_id, &rows).await?;
        info!(role_id = %role_id, grants = rows.len(), "Replaced role grants");
        Ok(rows)
    }
}
