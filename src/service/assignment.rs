//! User-role assignments scoped to company, branch or unit

use crate::domain::{
    CreateAssignmentInput, HierarchyNode, NodeKind, StringUuid, UserRoleAssignment,
};
use crate::error::{AppError, Result};
use crate::repository::{AssignmentRepository, HierarchyRepository};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

pub struct AssignmentService<A: AssignmentRepository, H: HierarchyRepository> {
    repo: Arc<A>,
    hierarchy: Arc<H>,
}

impl<A: AssignmentRepository, H: HierarchyRepository> AssignmentService<A, H> {
    pub fn new(repo: Arc<A>, hierarchy: Arc<H>) -> Self {
        Self { repo, hierarchy }
    }

    async fn require_node(&self, kind: NodeKind, id: StringUuid) -> Result<HierarchyNode> {
        let node = self
            .hierarchy
            .find_node(kind, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", kind, id)))?;
        if !node.is_active {
            return Err(AppError::BadRequest(format!("{} {} is inactive", kind, id)));
        }
        Ok(node)
    }

    /// Assign a role to a user; branch must sit in the company and unit in the branch.
    pub async fn assign(&self, input: CreateAssignmentInput) -> Result<UserRoleAssignment> {
        input.validate()?;

        let company_id = StringUuid::from(input.company_id);
        let company = self
            .hierarchy
            .find_company(company_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Company {} not found", company_id)))?;
        if !company.is_active {
            return Err(AppError::BadRequest(format!("Company {} is inactive", company_id)));
        }

        let role_id = StringUuid::from(input.role_id);
        if !self.repo.role_exists(role_id).await? {
            return Err(AppError::NotFound(format!("Role {} not found", role_id)));
        }

        let branch_id = input.branch_id.map(StringUuid::from);
        if let Some(branch_id) = branch_id {
            let branch = self.require_node(NodeKind::Branch, branch_id).await?;
            if branch.scope_id != company_id {
                return Err(AppError::InvalidHierarchy(format!(
                    "Branch {} does not belong to company {}",
                    branch_id, company_id
                )));
            }
        }

        let unit_id = input.unit_id.map(StringUuid::from);
        if let Some(unit_id) = unit_id {
            let unit = self.require_node(NodeKind::Unit, unit_id).await?;
            match branch_id {
                Some(branch_id) if unit.scope_id != branch_id => {
                    return Err(AppError::InvalidHierarchy(format!(
                        "Unit {} does not belong to branch {}",
                        unit_id, branch_id
                    )));
                }
                Some(_) => {}
                None => {
                    let branch = self.require_node(NodeKind::Branch, unit.scope_id).await?;
                    if branch.scope_id != company_id {
                        return Err(AppError::InvalidHierarchy(format!(
                            "Unit {} does not belong to company {}",
                            unit_id, company_id
                        )));
                    }
                }
            }
        }

        let assignment = UserRoleAssignment {
            id: StringUuid::new_v4(),
            user_id: input.user_id.into(),
            role_id,
            company_id,
            branch_id,
            unit_id,
        };
        if self.repo.exists(&assignment).await? {
            return Err(AppError::Conflict(format!(
                "User {} already holds role {} in this scope",
                assignment.user_id, role_id
            )));
        }

        let created = self.repo.create(&assignment).await?;
        info!(
            assignment_id = %created.id,
            user_id = %created.user_id,
            role_id = %created.role_id,
            company_id = %created.company_id,
            "Assigned role to user"
        );
        Ok(created)
    }

    pub async fn revoke(&self, id: StringUuid) -> Result<()> {
        self.repo.delete(id).await?;
        info!(assignment_id = %id, "Revoked role assignment");
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: StringUuid) -> Result<Vec<UserRoleAssignment>> {
        self.repo.list_by_user(user_id).await
    }
}
