//! Common test utilities
//!
//! `TestStore` keeps every table in memory behind one `RwLock` and implements
//! every repository trait, so the real services run end to end without a
//! database. Writes stage their changes on copies and swap them in only when
//! the whole operation succeeds, mirroring a committed transaction.

#![allow(dead_code)]


use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use erp_access_core::cache::VisibleModulesCache;
use erp_access_core::domain::{
    descendant_ids, plan_create, plan_reparent, Clock, Company, CopyPermissionsReport,
    CreateBranchInput, CreateSubscriptionInput, CreateUnitInput, FixedClock, HierarchyNode,
    IncludedModules, Module, NewNode, NodeKind, PaymentStatus, PlanModuleInclusion, Role,
    RoleModuleGrant, StringUuid, Subscription, SubscriptionPlan, SubscriptionStatus, UnitRoleLink,
    UnitRoleModuleOverride, UpdateNodeInput, UserRoleAssignment,
};
use erp_access_core::error::{AppError, Result};
use erp_access_core::repository::subscription::LifecycleChange;
use erp_access_core::repository::{
    AssignmentRepository, HierarchyRepository, PermissionSnapshot, PermissionSnapshotRepository,
    RoleGrantRepository, SubscriptionRepository, UnitRoleRepository,
};
use erp_access_core::service::{
    AssignmentService, HierarchyService, PermissionResolver, RoleGrantService, SubscriptionGate,
    SubscriptionService, UnitRoleService,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const MAX_DEPTH: i32 = 8;

/// Instant every test clock is pinned to
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub companies: Vec<Company>,
    /// Branches and units, told apart by `kind`
    pub nodes: Vec<HierarchyNode>,
    pub roles: Vec<Role>,
    pub modules: Vec<Module>,
    pub grants: Vec<RoleModuleGrant>,
    pub links: Vec<UnitRoleLink>,
    pub overrides: Vec<UnitRoleModuleOverride>,
    pub assignments: Vec<UserRoleAssignment>,
    pub plans: Vec<SubscriptionPlan>,
    pub plan_modules: Vec<PlanModuleInclusion>,
    pub subscriptions: Vec<Subscription>,
}

impl Tables {
    fn node(&self, kind: NodeKind, id: StringUuid) -> Option<&HierarchyNode> {
        self.nodes.iter().find(|n| n.kind == kind && n.id == id)
    }

    fn has_active_children(&self, kind: NodeKind, id: StringUuid) -> bool {
        self.nodes.iter().any(|n| {
            n.is_active
                && match (kind, n.kind) {
                    (NodeKind::Branch, NodeKind::Branch) => n.parent_id == Some(id),
                    (NodeKind::Branch, NodeKind::Unit) => n.scope_id == id,
                    (NodeKind::Unit, NodeKind::Unit) => n.parent_id == Some(id),
                    (NodeKind::Unit, NodeKind::Branch) => false,
                }
        })
    }

    fn has_assignments(&self, kind: NodeKind, id: StringUuid) -> bool {
        self.assignments.iter().any(|a| match kind {
            NodeKind::Branch => a.branch_id == Some(id),
            NodeKind::Unit => a.unit_id == Some(id),
        })
    }

    fn ensure_deletable(&self, kind: NodeKind, id: StringUuid) -> Result<()> {
        if self.has_active_children(kind, id) {
            return Err(AppError::Conflict(format!("{} {} has active children", kind, id)));
        }
        if self.has_assignments(kind, id) {
            return Err(AppError::Conflict(format!("{} {} has users assigned", kind, id)));
        }
        Ok(())
    }

    fn code_taken(&self, kind: NodeKind, scope_id: StringUuid, code: &str, exclude: Option<StringUuid>) -> bool {
        self.nodes.iter().any(|n| {
            n.kind == kind && n.scope_id == scope_id && n.code == code && Some(n.id) != exclude
        })
    }

    fn existing_modules(&self, ids: &[StringUuid]) -> Vec<StringUuid> {
        ids.iter()
            .filter(|id| self.modules.iter().any(|m| m.id == **id))
            .copied()
            .collect()
    }

    fn link(&self, unit_id: StringUuid, role_id: StringUuid) -> Option<&UnitRoleLink> {
        self.links
            .iter()
            .find(|l| l.unit_id == unit_id && l.role_id == role_id)
    }
}

pub struct TestStore {
    tables: RwLock<Tables>,
    /// Remaining row inserts before a write fails; `usize::MAX` never fails
    insert_budget: AtomicUsize,
    fail_plan_lookup: AtomicBool,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            insert_budget: AtomicUsize::new(usize::MAX),
            fail_plan_lookup: AtomicBool::new(false),
        }
    }

    /// Make the `n+1`th row insert from now on fail mid-transaction.
    pub fn fail_inserts_after(&self, n: usize) {
        self.insert_budget.store(n, Ordering::SeqCst);
    }

    pub fn fail_plan_lookup(&self, fail: bool) {
        self.fail_plan_lookup.store(fail, Ordering::SeqCst);
    }

    fn take_insert(&self) -> Result<()> {
        let taken = self
            .insert_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(usize::MAX),
                0 => None,
                n => Some(n - 1),
            });
        taken
            .map(|_| ())
            .map_err(|_| AppError::TransactionFailure("simulated insert failure".to_string()))
    }

    pub async fn snapshot(&self) -> Tables {
        self.tables.read().await.clone()
    }

    pub async fn add_company(&self, code: &str) -> Company {
        let company = Company {
            id: StringUuid::new_v4(),
            name: code.to_string(),
            code: code.to_string(),
            is_active: true,
            created_at: now(),
            updated_at: now(),
        };
        self.tables.write().await.companies.push(company.clone());
        company
    }

    pub async fn add_role(&self, name: &str) -> Role {
        let role = Role {
            id: StringUuid::new_v4(),
            name: name.to_string(),
            is_active: true,
        };
        self.tables.write().await.roles.push(role.clone());
        role
    }

    pub async fn set_role_active(&self, role_id: StringUuid, active: bool) {
        let mut tables = self.tables.write().await;
        if let Some(role) = tables.roles.iter_mut().find(|r| r.id == role_id) {
            role.is_active = active;
        }
    }

    pub async fn add_module(&self, code: &str, category: &str, tier: Option<&str>) -> Module {
        let mut tables = self.tables.write().await;
        let module = Module {
            id: StringUuid::new_v4(),
            code: code.to_string(),
            name: code.to_string(),
            category: category.to_string(),
            parent_id: None,
            subscription_tier: tier.map(str::to_string),
            sort_order: tables.modules.len() as i32,
            is_active: true,
        };
        tables.modules.push(module.clone());
        module
    }

    pub async fn add_plan(&self, name: &str, included: &[StringUuid]) -> SubscriptionPlan {
        let plan = SubscriptionPlan {
            id: StringUuid::new_v4(),
            name: name.to_string(),
            price_monthly: 99.0,
            price_yearly: 990.0,
            is_active: true,
        };
        let mut tables = self.tables.write().await;
        tables.plans.push(plan.clone());
        for module_id in included {
            tables.plan_modules.push(PlanModuleInclusion {
                plan_id: plan.id,
                module_id: *module_id,
                is_included: true,
            });
        }
        plan
    }

    pub async fn override_count(&self, link_id: StringUuid, module_id: StringUuid) -> usize {
        self.tables
            .read()
            .await
            .overrides
            .iter()
            .filter(|o| o.unit_role_id == link_id && o.module_id == module_id)
            .count()
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HierarchyRepository for TestStore {
    async fn find_company(&self, id: StringUuid) -> Result<Option<Company>> {
        let tables = self.tables.read().await;
        Ok(tables.companies.iter().find(|c| c.id == id).cloned())
    }

    async fn find_node(&self, kind: NodeKind, id: StringUuid) -> Result<Option<HierarchyNode>> {
        Ok(self.tables.read().await.node(kind, id).cloned())
    }

    async fn list_nodes(&self, kind: NodeKind, scope_id: StringUuid) -> Result<Vec<HierarchyNode>> {
        let tables = self.tables.read().await;
        let mut nodes: Vec<HierarchyNode> = tables
            .nodes
            .iter()
            .filter(|n| n.kind == kind && n.scope_id == scope_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then_with(|| a.name.cmp(&b.name))
                .then(a.id.cmp(&b.id))
        });
        Ok(nodes)
    }

    async fn exists_by_code(
        &self,
        kind: NodeKind,
        scope_id: StringUuid,
        code: &str,
        exclude_id: Option<StringUuid>,
    ) -> Result<bool> {
        Ok(self.tables.read().await.code_taken(kind, scope_id, code, exclude_id))
    }

    async fn has_children(&self, kind: NodeKind, id: StringUuid) -> Result<bool> {
        Ok(self.tables.read().await.has_active_children(kind, id))
    }

    async fn has_assigned_users(&self, kind: NodeKind, id: StringUuid) -> Result<bool> {
        Ok(self.tables.read().await.has_assignments(kind, id))
    }

    async fn create_node(&self, node: &NewNode, max_depth: i32) -> Result<HierarchyNode> {
        let mut tables = self.tables.write().await;

        let scope_active = match node.kind {
            NodeKind::Branch => tables
                .companies
                .iter()
                .find(|c| c.id == node.scope_id)
                .map(|c| c.is_active),
            NodeKind::Unit => tables.node(NodeKind::Branch, node.scope_id).map(|b| b.is_active),
        };
        if scope_active != Some(true) {
            return Err(AppError::NotFound(format!(
                "Scope {} not found or inactive",
                node.scope_id
            )));
        }

        let parent = match node.parent_id {
            Some(parent_id) => Some(tables.node(node.kind, parent_id).cloned().ok_or_else(|| {
                AppError::NotFound(format!("Parent {} {} not found", node.kind, parent_id))
            })?),
            None => None,
        };
        let position = plan_create(node.kind, node.scope_id, parent.as_ref(), max_depth)?;

        if tables.code_taken(node.kind, node.scope_id, &node.code, None) {
            return Err(AppError::Conflict(format!("{} code '{}' already exists", node.kind, node.code)));
        }

        let created = HierarchyNode {
            id: StringUuid::new_v4(),
            kind: node.kind,
            scope_id: node.scope_id,
            parent_id: node.parent_id,
            name: node.name.clone(),
            code: node.code.clone(),
            level: position.level,
            path: position.path,
            is_active: true,
        };
        tables.nodes.push(created.clone());
        Ok(created)
    }

    async fn update_node(
        &self,
        kind: NodeKind,
        id: StringUuid,
        input: &UpdateNodeInput,
        max_depth: i32,
    ) -> Result<HierarchyNode> {
        let mut tables = self.tables.write().await;
        let node = tables
            .node(kind, id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", kind, id)))?;

        let mut staged = tables.nodes.clone();

        if let Some(new_parent_id) = input.parent_change(node.parent_id) {
            let scope_nodes: Vec<HierarchyNode> = tables
                .nodes
                .iter()
                .filter(|n| n.kind == kind && n.scope_id == node.scope_id)
                .cloned()
                .collect();
            let new_parent = match new_parent_id {
                Some(parent_id) => Some(tables.node(kind, parent_id).cloned().ok_or_else(|| {
                    AppError::NotFound(format!("Parent {} {} not found", kind, parent_id))
                })?),
                None => None,
            };

            for update in plan_reparent(&scope_nodes, id, new_parent.as_ref(), max_depth)? {
                if let Some(row) = staged.iter_mut().find(|n| n.kind == kind && n.id == update.id) {
                    row.parent_id = update.parent_id;
                    row.level = update.level;
                    row.path = update.path;
                }
            }
        }

        if input.is_active == Some(false) && node.is_active {
            tables.ensure_deletable(kind, id)?;
        }
        if let Some(code) = &input.code {
            if tables.code_taken(kind, node.scope_id, code, Some(id)) {
                return Err(AppError::Conflict(format!("{} code already exists", kind)));
            }
        }

        let row = staged
            .iter_mut()
            .find(|n| n.kind == kind && n.id == id)
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", kind, id)))?;
        if let Some(name) = &input.name {
            row.name = name.clone();
        }
        if let Some(code) = &input.code {
            row.code = code.clone();
        }
        if let Some(active) = input.is_active {
            row.is_active = active;
        }
        let updated = row.clone();

        tables.nodes = staged;
        Ok(updated)
    }

    async fn soft_delete_node(&self, kind: NodeKind, id: StringUuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        let node = tables
            .node(kind, id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", kind, id)))?;
        if !node.is_active {
            return Ok(());
        }
        tables.ensure_deletable(kind, id)?;

        if let Some(row) = tables.nodes.iter_mut().find(|n| n.kind == kind && n.id == id) {
            row.is_active = false;
        }
        Ok(())
    }
}

#[async_trait]
impl RoleGrantRepository for TestStore {
    async fn find_role(&self, id: StringUuid) -> Result<Option<Role>> {
        Ok(self.tables.read().await.roles.iter().find(|r| r.id == id).cloned())
    }

    async fn find_existing_modules(&self, module_ids: &[StringUuid]) -> Result<Vec<StringUuid>> {
        Ok(self.tables.read().await.existing_modules(module_ids))
    }

    async fn find_grants(&self, role_id: StringUuid) -> Result<Vec<RoleModuleGrant>> {
        let tables = self.tables.read().await;
        Ok(tables.grants.iter().filter(|g| g.role_id == role_id).cloned().collect())
    }

    async fn replace_grants(&self, role_id: StringUuid, grants: &[RoleModuleGrant]) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.roles.iter().any(|r| r.id == role_id) {
            return Err(AppError::NotFound(format!("Role {} not found", role_id)));
        }

        let mut staged: Vec<RoleModuleGrant> = tables
            .grants
            .iter()
            .filter(|g| g.role_id != role_id)
            .cloned()
            .collect();
        for grant in grants {
            self.take_insert()?;
            staged.push(grant.clone());
        }
        tables.grants = staged;
        Ok(())
    }
}

#[async_trait]
impl UnitRoleRepository for TestStore {
    async fn unit_exists(&self, unit_id: StringUuid) -> Result<bool> {
        Ok(self.tables.read().await.node(NodeKind::Unit, unit_id).is_some())
    }

    async fn role_exists(&self, role_id: StringUuid) -> Result<bool> {
        Ok(self.tables.read().await.roles.iter().any(|r| r.id == role_id))
    }

    async fn find_existing_modules(&self, module_ids: &[StringUuid]) -> Result<Vec<StringUuid>> {
        Ok(self.tables.read().await.existing_modules(module_ids))
    }

    async fn exists_by_unit_and_role(&self, unit_id: StringUuid, role_id: StringUuid) -> Result<bool> {
        Ok(self.tables.read().await.link(unit_id, role_id).is_some())
    }

    async fn create_link(&self, unit_id: StringUuid, role_id: StringUuid) -> Result<UnitRoleLink> {
        let mut tables = self.tables.write().await;
        if tables.link(unit_id, role_id).is_some() {
            return Err(AppError::Conflict(format!(
                "Role {} is already linked to unit {}",
                role_id, unit_id
            )));
        }
        let link = UnitRoleLink {
            id: StringUuid::new_v4(),
            unit_id,
            role_id,
            created_at: now(),
        };
        tables.links.push(link.clone());
        Ok(link)
    }

    async fn find_link_by_id(&self, id: StringUuid) -> Result<Option<UnitRoleLink>> {
        Ok(self.tables.read().await.links.iter().find(|l| l.id == id).cloned())
    }

    async fn find_links_by_unit(&self, unit_id: StringUuid) -> Result<Vec<UnitRoleLink>> {
        let tables = self.tables.read().await;
        Ok(tables.links.iter().filter(|l| l.unit_id == unit_id).cloned().collect())
    }

    async fn delete_link(&self, id: StringUuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.links.iter().any(|l| l.id == id) {
            return Err(AppError::NotFound(format!("Unit role link {} not found", id)));
        }
        tables.overrides.retain(|o| o.unit_role_id != id);
        tables.links.retain(|l| l.id != id);
        Ok(())
    }

    async fn find_overrides(&self, unit_role_id: StringUuid) -> Result<Vec<UnitRoleModuleOverride>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<UnitRoleModuleOverride> = tables
            .overrides
            .iter()
            .filter(|o| o.unit_role_id == unit_role_id)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.module_id);
        Ok(rows)
    }

    async fn replace_overrides(
        &self,
        unit_role_id: StringUuid,
        overrides: &[UnitRoleModuleOverride],
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.links.iter().any(|l| l.id == unit_role_id) {
            return Err(AppError::NotFound(format!(
                "Unit role link {} not found",
                unit_role_id
            )));
        }

        let mut staged: Vec<UnitRoleModuleOverride> = tables
            .overrides
            .iter()
            .filter(|o| o.unit_role_id != unit_role_id)
            .cloned()
            .collect();
        for row in overrides {
            self.take_insert()?;
            staged.push(row.clone());
        }
        tables.overrides = staged;
        Ok(())
    }

    async fn copy_permissions(
        &self,
        source_unit_id: StringUuid,
        target_unit_id: StringUuid,
        role_id: StringUuid,
        overwrite_existing: bool,
    ) -> Result<CopyPermissionsReport> {
        let mut tables = self.tables.write().await;
        let source = tables.link(source_unit_id, role_id).cloned().ok_or_else(|| {
            AppError::NotFound(format!(
                "Role {} is not linked to unit {}",
                role_id, source_unit_id
            ))
        })?;

        let mut staged_links = tables.links.clone();
        let (target_link_id, link_created) = match tables.link(target_unit_id, role_id) {
            Some(link) => (link.id, false),
            None => {
                let link = UnitRoleLink {
                    id: StringUuid::new_v4(),
                    unit_id: target_unit_id,
                    role_id,
                    created_at: now(),
                };
                staged_links.push(link.clone());
                (link.id, true)
            }
        };

        let mut staged = tables.overrides.clone();
        if overwrite_existing {
            staged.retain(|o| o.unit_role_id != target_link_id);
        }

        let source_rows: Vec<UnitRoleModuleOverride> = tables
            .overrides
            .iter()
            .filter(|o| o.unit_role_id == source.id)
            .cloned()
            .collect();
        let mut report = CopyPermissionsReport {
            target_link_id,
            link_created,
            copied: 0,
            skipped: 0,
        };
        for row in source_rows {
            let present = staged
                .iter()
                .any(|o| o.unit_role_id == target_link_id && o.module_id == row.module_id);
            if !overwrite_existing && present {
                report.skipped += 1;
                continue;
            }
            self.take_insert()?;
            staged.push(UnitRoleModuleOverride {
                unit_role_id: target_link_id,
                ..row
            });
            report.copied += 1;
        }

        tables.links = staged_links;
        tables.overrides = staged;
        Ok(report)
    }
}

#[async_trait]
impl SubscriptionRepository for TestStore {
    async fn list_basic_modules(&self) -> Result<Vec<StringUuid>> {
        let tables = self.tables.read().await;
        Ok(tables
            .modules
            .iter()
            .filter(|m| m.is_active && m.is_ungated())
            .map(|m| m.id)
            .collect())
    }

    async fn list_included_modules(
        &self,
        company_id: StringUuid,
        now: DateTime<Utc>,
    ) -> Result<IncludedModules> {
        if self.fail_plan_lookup.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        let tables = self.tables.read().await;
        let active_modules: HashSet<StringUuid> = tables
            .modules
            .iter()
            .filter(|m| m.is_active)
            .map(|m| m.id)
            .collect();

        let mut modules = HashSet::new();
        let mut valid_until: Option<DateTime<Utc>> = None;
        for subscription in tables
            .subscriptions
            .iter()
            .filter(|s| s.company_id == company_id && s.is_current(now))
        {
            let contributed: Vec<StringUuid> = tables
                .plan_modules
                .iter()
                .filter(|pm| {
                    pm.plan_id == subscription.plan_id
                        && pm.is_included
                        && active_modules.contains(&pm.module_id)
                })
                .map(|pm| pm.module_id)
                .collect();
            if contributed.is_empty() {
                continue;
            }
            modules.extend(contributed);
            valid_until = Some(match valid_until {
                Some(end) => end.min(subscription.end_date),
                None => subscription.end_date,
            });
        }
        Ok(IncludedModules::new(modules.into_iter().collect(), valid_until))
    }

    async fn find_module(&self, id: StringUuid) -> Result<Option<Module>> {
        Ok(self.tables.read().await.modules.iter().find(|m| m.id == id).cloned())
    }

    async fn list_modules(&self) -> Result<Vec<Module>> {
        Ok(self.tables.read().await.modules.clone())
    }

    async fn company_exists(&self, company_id: StringUuid) -> Result<bool> {
        Ok(self.tables.read().await.companies.iter().any(|c| c.id == company_id))
    }

    async fn find_plan(&self, id: StringUuid) -> Result<Option<SubscriptionPlan>> {
        Ok(self.tables.read().await.plans.iter().find(|p| p.id == id).cloned())
    }

    async fn create(&self, input: &CreateSubscriptionInput) -> Result<Subscription> {
        let subscription = Subscription {
            id: StringUuid::new_v4(),
            company_id: input.company_id.into(),
            plan_id: input.plan_id.into(),
            status: SubscriptionStatus::Active,
            payment_status: PaymentStatus::Pending,
            start_date: input.start_date,
            end_date: input.end_date,
            created_at: now(),
            updated_at: now(),
        };
        self.tables.write().await.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<Subscription>> {
        Ok(self.tables.read().await.subscriptions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_by_company(&self, company_id: StringUuid) -> Result<Vec<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .iter()
            .filter(|s| s.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn update_lifecycle(&self, id: StringUuid, change: &LifecycleChange) -> Result<Subscription> {
        let mut tables = self.tables.write().await;
        let row = tables
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", id)))?;
        if row.status != change.expected_status {
            return Err(AppError::Conflict(format!(
                "Subscription {} is no longer {}",
                id, change.expected_status
            )));
        }
        row.status = change.new_status;
        if let Some(end_date) = change.end_date {
            row.end_date = end_date;
        }
        if let Some(payment_status) = change.payment_status {
            row.payment_status = payment_status;
        }
        row.updated_at = now();
        Ok(row.clone())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut expired = 0;
        for row in tables
            .subscriptions
            .iter_mut()
            .filter(|s| s.status == SubscriptionStatus::Active && s.end_date <= now)
        {
            row.status = SubscriptionStatus::Expired;
            expired += 1;
        }
        Ok(expired)
    }
}

#[async_trait]
impl AssignmentRepository for TestStore {
    async fn role_exists(&self, role_id: StringUuid) -> Result<bool> {
        Ok(self.tables.read().await.roles.iter().any(|r| r.id == role_id))
    }

    async fn create(&self, assignment: &UserRoleAssignment) -> Result<UserRoleAssignment> {
        self.tables.write().await.assignments.push(assignment.clone());
        Ok(assignment.clone())
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<UserRoleAssignment>> {
        Ok(self.tables.read().await.assignments.iter().find(|a| a.id == id).cloned())
    }

    async fn list_by_user(&self, user_id: StringUuid) -> Result<Vec<UserRoleAssignment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn exists(&self, assignment: &UserRoleAssignment) -> Result<bool> {
        Ok(self.tables.read().await.assignments.iter().any(|a| {
            a.user_id == assignment.user_id
                && a.role_id == assignment.role_id
                && a.company_id == assignment.company_id
                && a.branch_id == assignment.branch_id
                && a.unit_id == assignment.unit_id
        }))
    }

    async fn delete(&self, id: StringUuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        let before = tables.assignments.len();
        tables.assignments.retain(|a| a.id != id);
        if tables.assignments.len() == before {
            return Err(AppError::NotFound(format!("Assignment {} not found", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionSnapshotRepository for TestStore {
    async fn load_snapshot(&self, user_id: StringUuid) -> Result<PermissionSnapshot> {
        let tables = self.tables.read().await;
        let assignments: Vec<UserRoleAssignment> = tables
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();

        let role_ids: HashSet<StringUuid> = assignments.iter().map(|a| a.role_id).collect();
        let pairs: HashSet<(StringUuid, StringUuid)> = assignments
            .iter()
            .filter_map(|a| a.unit_id.map(|u| (u, a.role_id)))
            .collect();
        let links: Vec<UnitRoleLink> = tables
            .links
            .iter()
            .filter(|l| pairs.contains(&(l.unit_id, l.role_id)))
            .cloned()
            .collect();
        let link_ids: HashSet<StringUuid> = links.iter().map(|l| l.id).collect();

        Ok(PermissionSnapshot::from_rows(
            assignments.clone(),
            tables
                .roles
                .iter()
                .filter(|r| role_ids.contains(&r.id))
                .cloned()
                .collect(),
            tables
                .nodes
                .iter()
                .filter(|n| n.kind == NodeKind::Unit && pairs.iter().any(|(u, _)| *u == n.id))
                .map(|n| (n.id, n.is_active))
                .collect(),
            links,
            tables
                .grants
                .iter()
                .filter(|g| role_ids.contains(&g.role_id))
                .cloned()
                .collect(),
            tables
                .overrides
                .iter()
                .filter(|o| link_ids.contains(&o.unit_role_id))
                .cloned()
                .collect(),
            tables.modules.clone(),
        ))
    }
}

/// Every service wired over one shared `TestStore`.
pub struct TestApp {
    pub store: Arc<TestStore>,
    pub cache: Arc<VisibleModulesCache>,
    pub hierarchy: HierarchyService<TestStore>,
    pub grants: RoleGrantService<TestStore>,
    pub unit_roles: UnitRoleService<TestStore>,
    pub assignments: AssignmentService<TestStore, TestStore>,
    pub gate: Arc<SubscriptionGate<TestStore>>,
    pub subscriptions: SubscriptionService<TestStore>,
    pub resolver: PermissionResolver<TestStore, TestStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_cache(VisibleModulesCache::disabled())
    }

    pub fn with_cache(cache: VisibleModulesCache) -> Self {
        let store = Arc::new(TestStore::new());
        let cache = Arc::new(cache);
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));

        let gate = Arc::new(SubscriptionGate::new(store.clone(), cache.clone(), clock.clone()));
        Self {
            hierarchy: HierarchyService::new(store.clone(), MAX_DEPTH),
            grants: RoleGrantService::new(store.clone()),
            unit_roles: UnitRoleService::new(store.clone()),
            assignments: AssignmentService::new(store.clone(), store.clone()),
            subscriptions: SubscriptionService::new(store.clone(), cache.clone(), clock),
            resolver: PermissionResolver::new(store.clone(), gate.clone()),
            gate,
            cache,
            store,
        }
    }

    pub async fn branch(
        &self,
        company: &Company,
        parent: Option<&HierarchyNode>,
        code: &str,
    ) -> HierarchyNode {
        self.hierarchy
            .create_branch(CreateBranchInput {
                company_id: company.id.into(),
                parent_id: parent.map(|p| p.id.into()),
                name: code.to_string(),
                code: code.to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn unit(
        &self,
        branch: &HierarchyNode,
        parent: Option<&HierarchyNode>,
        code: &str,
    ) -> HierarchyNode {
        self.hierarchy
            .create_unit(CreateUnitInput {
                branch_id: branch.id.into(),
                parent_id: parent.map(|p| p.id.into()),
                name: code.to_string(),
                code: code.to_string(),
            })
            .await
            .unwrap()
    }

    /// Subscribe `company` to `plan` for thirty days from the test clock.
    pub async fn subscribe(&self, company: &Company, plan: &SubscriptionPlan) -> Subscription {
        self.subscriptions
            .create(CreateSubscriptionInput {
                company_id: company.id.into(),
                plan_id: plan.id.into(),
                start_date: now() - chrono::Duration::days(1),
                end_date: now() + chrono::Duration::days(30),
            })
            .await
            .unwrap()
    }

    pub async fn node(&self, kind: NodeKind, id: StringUuid) -> HierarchyNode {
        self.hierarchy.get(kind, id).await.unwrap()
    }

    /// Ids of `root` and everything below it in the current store.
    pub async fn subtree_ids(&self, root: &HierarchyNode) -> Vec<StringUuid> {
        let scope_nodes = self.store.snapshot().await.nodes;
        let mut ids = vec![root.id];
        ids.extend(descendant_ids(&scope_nodes, root.id));
        ids
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}
