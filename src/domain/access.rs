//! Roles, modules and the permission records layered on them

use super::common::StringUuid;
use super::tree::TreeItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Tier value that keeps a module visible without any plan.
pub const BASIC_TIER: &str = "basic";

/// Named permission template, company-agnostic
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: StringUuid,
    pub name: String,
    pub is_active: bool,
}

/// Application module (menu entry)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Module {
    pub id: StringUuid,
    pub code: String,
    pub name: String,
    pub category: String,
    /// Parent for nested menus
    pub parent_id: Option<StringUuid>,
    /// "basic", another tier name, or NULL
    pub subscription_tier: Option<String>,
    pub sort_order: i32,
    pub is_active: bool,
}

impl Module {
    /// Basic or untiered modules are never gated by a plan.
    pub fn is_ungated(&self) -> bool {
        match &self.subscription_tier {
            None => true,
            Some(tier) => tier.eq_ignore_ascii_case(BASIC_TIER),
        }
    }
}

/// read / write / delete / approve bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionBits {
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_approve: bool,
}

impl PermissionBits {
    /// Per-field OR: the more permissive side wins each bit.
    pub fn union(self, other: PermissionBits) -> PermissionBits {
        PermissionBits {
            can_read: self.can_read || other.can_read,
            can_write: self.can_write || other.can_write,
            can_delete: self.can_delete || other.can_delete,
            can_approve: self.can_approve || other.can_approve,
        }
    }

    pub fn allows(&self, action: PermissionAction) -> bool {
        match action {
            PermissionAction::Read => self.can_read,
            PermissionAction::Write => self.can_write,
            PermissionAction::Delete => self.can_delete,
            PermissionAction::Approve => self.can_approve,
        }
    }
}

/// A single permission question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Read,
    Write,
    Delete,
    Approve,
}

impl std::str::FromStr for PermissionAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(PermissionAction::Read),
            "write" => Ok(PermissionAction::Write),
            "delete" => Ok(PermissionAction::Delete),
            "approve" => Ok(PermissionAction::Approve),
            _ => Err(format!("Unknown permission action: {}", s)),
        }
    }
}

/// Default (role, module) grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RoleModuleGrant {
    pub role_id: StringUuid,
    pub module_id: StringUuid,
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
}

impl RoleModuleGrant {
    /// Base grants carry no approval bit.
    pub fn bits(&self) -> PermissionBits {
        PermissionBits {
            can_read: self.can_read,
            can_write: self.can_write,
            can_delete: self.can_delete,
            can_approve: false,
        }
    }
}

/// One row of a wholesale grant replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantInput {
    pub module_id: Uuid,
    #[serde(default)]
    pub can_read: bool,
    #[serde(default)]
    pub can_write: bool,
    #[serde(default)]
    pub can_delete: bool,
}

/// (unit, role) activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UnitRoleLink {
    pub id: StringUuid,
    pub unit_id: StringUuid,
    pub role_id: StringUuid,
    pub created_at: DateTime<Utc>,
}

/// Unit-and-role specific override of a module grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UnitRoleModuleOverride {
    pub unit_role_id: StringUuid,
    pub module_id: StringUuid,
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_approve: bool,
}

impl UnitRoleModuleOverride {
    pub fn bits(&self) -> PermissionBits {
        PermissionBits {
            can_read: self.can_read,
            can_write: self.can_write,
            can_delete: self.can_delete,
            can_approve: self.can_approve,
        }
    }
}

/// One row of a wholesale override replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideInput {
    pub module_id: Uuid,
    #[serde(default)]
    pub can_read: bool,
    #[serde(default)]
    pub can_write: bool,
    #[serde(default)]
    pub can_delete: bool,
    #[serde(default)]
    pub can_approve: bool,
}

/// Result of copying a unit's overrides for a role onto another unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyPermissionsReport {
    pub target_link_id: StringUuid,
    pub link_created: bool,
    pub copied: usize,
    /// Source rows left alone because the target already had that module
    pub skipped: usize,
}

/// (user, role, company, branch?, unit?) assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserRoleAssignment {
    pub id: StringUuid,
    pub user_id: StringUuid,
    pub role_id: StringUuid,
    pub company_id: StringUuid,
    pub branch_id: Option<StringUuid>,
    pub unit_id: Option<StringUuid>,
}

/// Input for assigning a role to a user
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAssignmentInput {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub company_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
}

/// Effective permission of one user on one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModulePermission {
    pub module_id: StringUuid,
    pub module_code: String,
    pub module_name: String,
    pub category: String,
    pub parent_id: Option<StringUuid>,
    pub sort_order: i32,
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_approve: bool,
    /// A unit override decided the bits
    pub is_customized: bool,
}

impl ModulePermission {
    pub fn new(module: &Module, bits: PermissionBits, is_customized: bool) -> Self {
        Self {
            module_id: module.id,
            module_code: module.code.clone(),
            module_name: module.name.clone(),
            category: module.category.clone(),
            parent_id: module.parent_id,
            sort_order: module.sort_order,
            can_read: bits.can_read,
            can_write: bits.can_write,
            can_delete: bits.can_delete,
            can_approve: bits.can_approve,
            is_customized,
        }
    }

    pub fn bits(&self) -> PermissionBits {
        PermissionBits {
            can_read: self.can_read,
            can_write: self.can_write,
            can_delete: self.can_delete,
            can_approve: self.can_approve,
        }
    }

    /// Fold another assignment's view of the same module into this one.
    pub fn merge(&mut self, other: &ModulePermission) {
        let bits = self.bits().union(other.bits());
        self.can_read = bits.can_read;
        self.can_write = bits.can_write;
        self.can_delete = bits.can_delete;
        self.can_approve = bits.can_approve;
        self.is_customized |= other.is_customized;
    }
}

impl TreeItem for ModulePermission {
    fn item_id(&self) -> StringUuid {
        self.module_id
    }

    fn parent_item_id(&self) -> Option<StringUuid> {
        self.parent_id
    }
}
