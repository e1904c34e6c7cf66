//! Effective permission resolution
//!
//! For each of a user's assignments the role's default grants are overlaid
//! with the unit's overrides (override wins per module), the result is
//! filtered by the company's visible modules, and assignments are merged with
//! a per-bit OR. One bad assignment is logged and skipped; it never fails the
//! whole resolution.

use super::subscription::SubscriptionGate;
use crate::domain::{
    Forest, ModulePermission, PermissionAction, PermissionBits, StringUuid, TreeNode,
    UserRoleAssignment,
};
use crate::error::Result;
use crate::repository::{PermissionSnapshot, PermissionSnapshotRepository, SubscriptionRepository};
use crate::telemetry::metrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Why an assignment contributed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingRole,
    InactiveRole,
    MissingUnit,
    InactiveUnit,
    SubscriptionUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingRole => "missing_role",
            SkipReason::InactiveRole => "inactive_role",
            SkipReason::MissingUnit => "missing_unit",
            SkipReason::InactiveUnit => "inactive_unit",
            SkipReason::SubscriptionUnavailable => "subscription_unavailable",
        }
    }
}

/// Overlay unit overrides on role grants for one assignment, before gating.
///
/// Modules missing from the snapshot or inactive are dropped. A grant with
/// every bit false is still reported.
pub fn resolve_assignment(
    snapshot: &PermissionSnapshot,
    assignment: &UserRoleAssignment,
) -> std::result::Result<Vec<ModulePermission>, SkipReason> {
    match snapshot.roles.get(&assignment.role_id) {
        None => return Err(SkipReason::MissingRole),
        Some(role) if !role.is_active => return Err(SkipReason::InactiveRole),
        Some(_) => {}
    }

    let mut base: HashMap<StringUuid, PermissionBits> = HashMap::new();
    if let Some(grants) = snapshot.grants.get(&assignment.role_id) {
        for grant in grants {
            base.insert(grant.module_id, grant.bits());
        }
    }

    let mut overrides: HashMap<StringUuid, PermissionBits> = HashMap::new();
    if let Some(unit_id) = assignment.unit_id {
        match snapshot.units.get(&unit_id) {
            None => return Err(SkipReason::MissingUnit),
            Some(false) => return Err(SkipReason::InactiveUnit),
            Some(true) => {}
        }
        let rows = snapshot
            .links
            .get(&(unit_id, assignment.role_id))
            .and_then(|link_id| snapshot.overrides.get(link_id));
        for row in rows.into_iter().flatten() {
            overrides.insert(row.module_id, row.bits());
        }
    }

    let touched: HashSet<StringUuid> = base.keys().chain(overrides.keys()).copied().collect();
    let mut resolved = Vec::with_capacity(touched.len());
    for module_id in touched {
        let Some(module) = snapshot.modules.get(&module_id) else {
            continue;
        };
        if !module.is_active {
            continue;
        }
        let permission = match (overrides.get(&module_id), base.get(&module_id)) {
            (Some(bits), _) => ModulePermission::new(module, *bits, true),
            (None, Some(bits)) => ModulePermission::new(module, *bits, false),
            (None, None) => continue,
        };
        resolved.push(permission);
    }
    Ok(resolved)
}

/// Fold `incoming` into `merged`, OR-ing bits of modules seen before.
pub fn merge_into(merged: &mut HashMap<StringUuid, ModulePermission>, incoming: Vec<ModulePermission>) {
    for permission in incoming {
        match merged.get_mut(&permission.module_id) {
            Some(existing) => existing.merge(&permission),
            None => {
                merged.insert(permission.module_id, permission);
            }
        }
    }
}

/// Category, then sort order, then name.
pub fn sort_permissions(permissions: &mut [ModulePermission]) {
    permissions.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then(a.sort_order.cmp(&b.sort_order))
            .then_with(|| a.module_name.cmp(&b.module_name))
            .then(a.module_id.cmp(&b.module_id))
    });
}

pub struct PermissionResolver<P, S>
where
    P: PermissionSnapshotRepository,
    S: SubscriptionRepository,
{
    snapshots: Arc<P>,
    gate: Arc<SubscriptionGate<S>>,
}

impl<P, S> PermissionResolver<P, S>
where
    P: PermissionSnapshotRepository,
    S: SubscriptionRepository,
{
    pub fn new(snapshots: Arc<P>, gate: Arc<SubscriptionGate<S>>) -> Self {
        Self { snapshots, gate }
    }

    pub async fn resolve_effective_permissions(&self, user_id: StringUuid) -> Result<Vec<ModulePermission>> {
        let started = Instant::now();
        let outcome = self.resolve(user_id).await;
        let label = if outcome.is_ok() { "ok" } else { "error" };
        metrics::record_resolution(label, started.elapsed().as_secs_f64());
        outcome
    }

    async fn resolve(&self, user_id: StringUuid) -> Result<Vec<ModulePermission>> {
        let snapshot = self.snapshots.load_snapshot(user_id).await?;

        let mut visible_by_company: HashMap<StringUuid, Option<HashSet<StringUuid>>> = HashMap::new();
        let mut merged: HashMap<StringUuid, ModulePermission> = HashMap::new();

        for assignment in &snapshot.assignments {
            let resolved = match resolve_assignment(&snapshot, assignment) {
                Ok(resolved) => resolved,
                Err(reason) => {
                    skip(user_id, assignment, reason);
                    continue;
                }
            };

            if !visible_by_company.contains_key(&assignment.company_id) {
                let visible = match self.gate.list_visible_modules(assignment.company_id).await {
                    Ok(visible) => Some(visible),
                    Err(e) => {
                        warn!(
                            user_id = %user_id,
                            company_id = %assignment.company_id,
                            error = %e,
                            "Could not determine visible modules"
                        );
                        None
                    }
                };
                visible_by_company.insert(assignment.company_id, visible);
            }
            let Some(Some(visible)) = visible_by_company.get(&assignment.company_id) else {
                skip(user_id, assignment, SkipReason::SubscriptionUnavailable);
                continue;
            };

            let gated = resolved
                .into_iter()
                .filter(|p| visible.contains(&p.module_id))
                .collect();
            merge_into(&mut merged, gated);
        }

        let mut permissions: Vec<ModulePermission> = merged.into_values().collect();
        sort_permissions(&mut permissions);
        debug!(
            user_id = %user_id,
            assignments = snapshot.assignments.len(),
            modules = permissions.len(),
            "Resolved effective permissions"
        );
        Ok(permissions)
    }

    /// Effective permissions nested by module parent; orphans become roots.
    pub async fn resolve_permission_menu(&self, user_id: StringUuid) -> Result<Vec<TreeNode<ModulePermission>>> {
        let permissions = self.resolve_effective_permissions(user_id).await?;
        Ok(Forest::assemble(&permissions).into_nested())
    }

    pub async fn check(
        &self,
        user_id: StringUuid,
        module_id: StringUuid,
        action: PermissionAction,
    ) -> Result<bool> {
        let permissions = self.resolve_effective_permissions(user_id).await?;
        Ok(permissions
            .iter()
            .find(|p| p.module_id == module_id)
            .map(|p| p.bits().allows(action))
            .unwrap_or(false))
    }
}

fn skip(user_id: StringUuid, assignment: &UserRoleAssignment, reason: SkipReason) {
    warn!(
        user_id = %user_id,
        assignment_id = %assignment.id,
        role_id = %assignment.role_id,
        unit_id = ?assignment.unit_id,
        reason = reason.as_str(),
        "Skipping role assignment"
    );
    metrics::record_skipped_assignment(reason.as_str());
}
