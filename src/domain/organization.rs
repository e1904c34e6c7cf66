//! Company / Branch / Unit hierarchy models
//!
//! Branches and Units share one shape: a self-referential `parent_id` inside a
//! scope (the owning Company for branches, the owning Branch for units) plus a
//! materialized `level` and `path`. The planning functions here are pure so the
//! repository can run them inside a transaction against rows it has locked.

use super::common::StringUuid;
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;
use validator::Validate;

/// Path of every root node.
pub const ROOT_PATH: &str = "/";

/// Level of every root node.
pub const ROOT_LEVEL: i32 = 1;

/// Tenant root
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Company {
    pub id: StringUuid,
    pub name: String,
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which hierarchy a node lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Branch,
    Unit,
}

impl NodeKind {
    pub fn table(&self) -> &'static str {
        match self {
            NodeKind::Branch => "branches",
            NodeKind::Unit => "units",
        }
    }

    /// Column holding the owning scope (company for branches, branch for units)
    pub fn scope_column(&self) -> &'static str {
        match self {
            NodeKind::Branch => "company_id",
            NodeKind::Unit => "branch_id",
        }
    }

    /// Column of `user_roles` that references this kind of node
    pub fn assignment_column(&self) -> &'static str {
        match self {
            NodeKind::Branch => "branch_id",
            NodeKind::Unit => "unit_id",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Branch => write!(f, "Branch"),
            NodeKind::Unit => write!(f, "Unit"),
        }
    }
}

/// A Branch or Unit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: StringUuid,
    pub kind: NodeKind,
    /// Owning company (branch) or owning branch (unit)
    pub scope_id: StringUuid,
    pub parent_id: Option<StringUuid>,
    pub name: String,
    pub code: String,
    pub level: i32,
    pub path: String,
    pub is_active: bool,
}

impl HierarchyNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn position(&self) -> NodePosition {
        NodePosition {
            level: self.level,
            path: self.path.clone(),
        }
    }
}

/// Materialized location of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePosition {
    pub level: i32,
    pub path: String,
}

impl NodePosition {
    pub fn root() -> Self {
        Self {
            level: ROOT_LEVEL,
            path: ROOT_PATH.to_string(),
        }
    }

    /// level = parent.level + 1, path = parent.path + "/" + parent.id
    pub fn child_of(parent: &HierarchyNode) -> Self {
        Self {
            level: parent.level + 1,
            path: format!("{}/{}", parent.path, parent.id),
        }
    }
}

/// Input for creating a branch
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBranchInput {
    pub company_id: Uuid,
    pub parent_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 50), custom(function = "validate_node_code"))]
    pub code: String,
}

/// Input for creating a unit
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUnitInput {
    pub branch_id: Uuid,
    pub parent_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 50), custom(function = "validate_node_code"))]
    pub code: String,
}

/// Input for updating a branch or unit
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateNodeInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50), custom(function = "validate_node_code"))]
    pub code: Option<String>,
    pub is_active: Option<bool>,
    // None: keep the current parent
    // Some(None): move to root
    // Some(Some(id)): move under `id`
    #[serde(default, deserialize_with = "present_or_null")]
    pub parent_id: Option<Option<Uuid>>,
}

/// Keeps an explicit `null` apart from a missing field.
///
/// Only called when the field is present, so `null` lands on `Some(None)`;
/// `#[serde(default)]` covers the missing case.
fn present_or_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl UpdateNodeInput {
    /// The requested parent, if it differs from `current`.
    pub fn parent_change(&self, current: Option<StringUuid>) -> Option<Option<StringUuid>> {
        match self.parent_id {
            Some(requested) => {
                let requested = requested.map(StringUuid::from);
                (requested != current).then_some(requested)
            }
            None => None,
        }
    }
}

/// Validated create request handed to the repository
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub kind: NodeKind,
    pub scope_id: StringUuid,
    pub parent_id: Option<StringUuid>,
    pub name: String,
    pub code: String,
}

impl From<CreateBranchInput> for NewNode {
    fn from(input: CreateBranchInput) -> Self {
        Self {
            kind: NodeKind::Branch,
            scope_id: input.company_id.into(),
            parent_id: input.parent_id.map(StringUuid::from),
            name: input.name,
            code: input.code,
        }
    }
}

impl From<CreateUnitInput> for NewNode {
    fn from(input: CreateUnitInput) -> Self {
        Self {
            kind: NodeKind::Unit,
            scope_id: input.branch_id.into(),
            parent_id: input.parent_id.map(StringUuid::from),
            name: input.name,
            code: input.code,
        }
    }
}

/// Level/path rewrite for one node of a moved subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    pub id: StringUuid,
    pub parent_id: Option<StringUuid>,
    pub level: i32,
    pub path: String,
}

fn validate_node_code(code: &str) -> std::result::Result<(), validator::ValidationError> {
    if NODE_CODE_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_node_code"))
    }
}

lazy_static::lazy_static! {
    pub static ref NODE_CODE_REGEX: regex::Regex =
        regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap();
}

/// Check a prospective parent against the new node's kind and scope.
fn check_parent(
    kind: NodeKind,
    scope_id: StringUuid,
    parent: &HierarchyNode,
) -> Result<()> {
    if parent.kind != kind {
        return Err(AppError::InvalidHierarchy(format!(
            "{} {} cannot parent a {}",
            parent.kind, parent.id, kind
        )));
    }
    if parent.scope_id != scope_id {
        let scope = match kind {
            NodeKind::Branch => "company",
            NodeKind::Unit => "branch",
        };
        return Err(AppError::InvalidHierarchy(format!(
            "Parent {} {} belongs to a different {}",
            kind, parent.id, scope
        )));
    }
    if !parent.is_active {
        return Err(AppError::InvalidHierarchy(format!(
            "Parent {} {} is inactive",
            kind, parent.id
        )));
    }
    Ok(())
}

fn check_depth(level: i32, max_depth: i32) -> Result<()> {
    if level > max_depth {
        return Err(AppError::InvalidHierarchy(format!(
            "Hierarchy depth {} exceeds maximum of {}",
            level, max_depth
        )));
    }
    Ok(())
}

/// Compute the position of a node about to be created.
pub fn plan_create(
    kind: NodeKind,
    scope_id: StringUuid,
    parent: Option<&HierarchyNode>,
    max_depth: i32,
) -> Result<NodePosition> {
    let position = match parent {
        Some(parent) => {
            check_parent(kind, scope_id, parent)?;
            NodePosition::child_of(parent)
        }
        None => NodePosition::root(),
    };
    check_depth(position.level, max_depth)?;
    Ok(position)
}

/// Ids of every descendant of `root_id`, breadth first, following `parent_id`.
pub fn descendant_ids(scope_nodes: &[HierarchyNode], root_id: StringUuid) -> Vec<StringUuid> {
    let mut children: HashMap<StringUuid, Vec<StringUuid>> = HashMap::new();
    for node in scope_nodes {
        if let Some(parent_id) = node.parent_id {
            children.entry(parent_id).or_default().push(node.id);
        }
    }

    let mut out = Vec::new();
    let mut queue = VecDeque::from([root_id]);
    while let Some(id) = queue.pop_front() {
        for child in children.get(&id).into_iter().flatten() {
            // rows already corrupted into a loop must not spin forever
            if *child != root_id && !out.contains(child) {
                out.push(*child);
                queue.push_back(*child);
            }
        }
    }
    out
}

/// Plan moving `node_id` under `new_parent` (None = to root).
///
/// `scope_nodes` must hold every node of the moved node's scope. Returns the
/// rewrite for the moved node followed by every descendant, parents before
/// children, so applying them in order never reads a stale parent.
pub fn plan_reparent(
    scope_nodes: &[HierarchyNode],
    node_id: StringUuid,
    new_parent: Option<&HierarchyNode>,
    max_depth: i32,
) -> Result<Vec<PositionUpdate>> {
    let by_id: HashMap<StringUuid, &HierarchyNode> =
        scope_nodes.iter().map(|n| (n.id, n)).collect();
    let node = by_id
        .get(&node_id)
        .ok_or_else(|| AppError::NotFound(format!("Node {} not found", node_id)))?;

    let descendants = descendant_ids(scope_nodes, node_id);

    let position = match new_parent {
        Some(parent) => {
            if parent.id == node_id {
                return Err(AppError::InvalidHierarchy(format!(
                    "{} {} cannot be its own parent",
                    node.kind, node_id
                )));
            }
            if descendants.contains(&parent.id) {
                return Err(AppError::InvalidHierarchy(format!(
                    "Moving {} {} under its descendant {} would create a cycle",
                    node.kind, node_id, parent.id
                )));
            }
            check_parent(node.kind, node.scope_id, parent)?;
            NodePosition::child_of(parent)
        }
        None => NodePosition::root(),
    };

    let mut updates = Vec::with_capacity(descendants.len() + 1);
    let mut placed: HashMap<StringUuid, NodePosition> = HashMap::new();
    check_depth(position.level, max_depth)?;
    updates.push(PositionUpdate {
        id: node_id,
        parent_id: new_parent.map(|p| p.id),
        level: position.level,
        path: position.path.clone(),
    });
    placed.insert(node_id, position);

    // descendant_ids is breadth first, so every parent is placed before its children
    for id in descendants {
        let child = by_id[&id];
        let parent_id = child.parent_id.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Descendant {} has no parent", id))
        })?;
        let parent_position = placed.get(&parent_id).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Parent {} of {} not yet placed", parent_id, id))
        })?;
        let position = NodePosition {
            level: parent_position.level + 1,
            path: format!("{}/{}", parent_position.path, parent_id),
        };
        check_depth(position.level, max_depth)?;
        updates.push(PositionUpdate {
            id,
            parent_id: Some(parent_id),
            level: position.level,
            path: position.path.clone(),
        });
        placed.insert(id, position);
    }

    Ok(updates)
}
