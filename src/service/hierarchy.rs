//! Branch / Unit hierarchy business logic

use crate::domain::{
    CreateBranchInput, CreateUnitInput, Forest, HierarchyNode, NewNode, NodeKind, StringUuid,
    TreeNode, UpdateNodeInput,
};
use crate::error::{AppError, Result};
use crate::repository::HierarchyRepository;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

/// Root of a tree request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeScope {
    /// All branches of a company
    Company(StringUuid),
    /// All units of a branch
    Branch(StringUuid),
}

pub struct HierarchyService<R: HierarchyRepository> {
    repo: Arc<R>,
    max_depth: i32,
}

impl<R: HierarchyRepository> HierarchyService<R> {
    pub fn new(repo: Arc<R>, max_depth: i32) -> Self {
        Self { repo, max_depth }
    }

    pub async fn create_branch(&self, input: CreateBranchInput) -> Result<HierarchyNode> {
        input.validate()?;
        self.create(NewNode::from(input)).await
    }

    pub async fn create_unit(&self, input: CreateUnitInput) -> Result<HierarchyNode> {
        input.validate()?;
        self.create(NewNode::from(input)).await
    }

    async fn create(&self, node: NewNode) -> Result<HierarchyNode> {
        if self
            .repo
            .exists_by_code(node.kind, node.scope_id, &node.code, None)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "{} with code '{}' already exists",
                node.kind, node.code
            )));
        }

        let created = self.repo.create_node(&node, self.max_depth).await?;
        info!(
            kind = %created.kind,
            node_id = %created.id,
            scope_id = %created.scope_id,
            level = created.level,
            "Created hierarchy node"
        );
        Ok(created)
    }

    pub async fn get(&self, kind: NodeKind, id: StringUuid) -> Result<HierarchyNode> {
        self.repo
            .find_node(kind, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", kind, id)))
    }

    pub async fn update_node(
        &self,
        kind: NodeKind,
        id: StringUuid,
        input: UpdateNodeInput,
    ) -> Result<HierarchyNode> {
        input.validate()?;
        let current = self.get(kind, id).await?;

        if let Some(code) = &input.code {
            if code != &current.code
                && self
                    .repo
                    .exists_by_code(kind, current.scope_id, code, Some(id))
                    .await?
            {
                return Err(AppError::Conflict(format!(
                    "{} with code '{}' already exists",
                    kind, code
                )));
            }
        }

        let moved = input.parent_change(current.parent_id).is_some();
        let updated = self.repo.update_node(kind, id, &input, self.max_depth).await?;
        info!(kind = %kind, node_id = %id, moved, level = updated.level, "Updated hierarchy node");
        Ok(updated)
    }

    /// Soft-delete; refused while the node has active children or assigned users.
    pub async fn delete_node(&self, kind: NodeKind, id: StringUuid) -> Result<()> {
        self.repo.soft_delete_node(kind, id).await?;
        info!(kind = %kind, node_id = %id, "Deactivated hierarchy node");
        Ok(())
    }

    pub async fn exists_by_code(
        &self,
        kind: NodeKind,
        scope_id: StringUuid,
        code: &str,
        exclude_id: Option<StringUuid>,
    ) -> Result<bool> {
        self.repo.exists_by_code(kind, scope_id, code, exclude_id).await
    }

    pub async fn has_children(&self, kind: NodeKind, id: StringUuid) -> Result<bool> {
        self.repo.has_children(kind, id).await
    }

    pub async fn has_assigned_users(&self, kind: NodeKind, id: StringUuid) -> Result<bool> {
        self.repo.has_assigned_users(kind, id).await
    }

    /// Flat node list of a scope, ordered by level then name
    pub async fn list(&self, scope: TreeScope) -> Result<Vec<HierarchyNode>> {
        match scope {
            TreeScope::Company(company_id) => {
                if self.repo.find_company(company_id).await?.is_none() {
                    return Err(AppError::NotFound(format!("Company {} not found", company_id)));
                }
                self.repo.list_nodes(NodeKind::Branch, company_id).await
            }
            TreeScope::Branch(branch_id) => {
                self.get(NodeKind::Branch, branch_id).await?;
                self.repo.list_nodes(NodeKind::Unit, branch_id).await
            }
        }
    }

    pub async fn build_tree(&self, scope: TreeScope) -> Result<Vec<TreeNode<HierarchyNode>>> {
        let nodes = self.list(scope).await?;
        Ok(Forest::assemble(&nodes).into_nested())
    }
}
