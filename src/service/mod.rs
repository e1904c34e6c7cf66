//! Business logic layer

pub mod assignment;
pub mod hierarchy;
pub mod permission;
pub mod role_grant;
pub mod subscription;
pub mod unit_role;

pub use assignment::AssignmentService;
pub use hierarchy::{HierarchyService, TreeScope};
pub use permission::PermissionResolver;
pub use role_grant::RoleGrantService;
pub use subscription::{SubscriptionGate, SubscriptionService};
pub use unit_role::UnitRoleService;

use crate::domain::StringUuid;
use crate::error::{AppError, Result};
use std::collections::HashSet;

/// Reject a replacement set naming the same module twice.
pub(crate) fn ensure_distinct_modules(module_ids: &[StringUuid]) -> Result<()> {
    let mut seen = HashSet::with_capacity(module_ids.len());
    for id in module_ids {
        if !seen.insert(*id) {
            return Err(AppError::Validation(format!(
                "Module {} appears more than once",
                id
            )));
        }
    }
    Ok(())
}

/// Fail with `NotFound` naming every requested module absent from `found`.
pub(crate) fn ensure_modules_found(requested: &[StringUuid], found: &[StringUuid]) -> Result<()> {
    let found: HashSet<&StringUuid> = found.iter().collect();
    let missing: Vec<String> = requested
        .iter()
        .filter(|id| !found.contains(id))
        .map(|id| id.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "Modules not found: {}",
            missing.join(", ")
        )))
    }
}
