//! Branch / Unit hierarchy repository

use super::{conflict_on_duplicate, finish_transaction};
use crate::domain::{
    plan_create, plan_reparent, Company, HierarchyNode, NewNode, NodeKind, StringUuid,
    UpdateNodeInput,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::{Executor, FromRow, MySql, MySqlConnection, MySqlPool};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HierarchyRepository: Send + Sync {
    async fn find_company(&self, id: StringUuid) -> Result<Option<Company>>;
    async fn find_node(&self, kind: NodeKind, id: StringUuid) -> Result<Option<HierarchyNode>>;
    /// Every node of one scope, ordered by level then name
    async fn list_nodes(&self, kind: NodeKind, scope_id: StringUuid) -> Result<Vec<HierarchyNode>>;
    async fn exists_by_code(
        &self,
        kind: NodeKind,
        scope_id: StringUuid,
        code: &str,
        exclude_id: Option<StringUuid>,
    ) -> Result<bool>;
    async fn has_children(&self, kind: NodeKind, id: StringUuid) -> Result<bool>;
    async fn has_assigned_users(&self, kind: NodeKind, id: StringUuid) -> Result<bool>;

    /// Insert a node with its level/path computed from the locked parent.
    async fn create_node(&self, node: &NewNode, max_depth: i32) -> Result<HierarchyNode>;
    /// Apply field changes; a parent change rewrites the whole moved subtree.
    async fn update_node(
        &self,
        kind: NodeKind,
        id: StringUuid,
        input: &UpdateNodeInput,
        max_depth: i32,
    ) -> Result<HierarchyNode>;
    /// Deactivate a node that has no active children and no assignments.
    async fn soft_delete_node(&self, kind: NodeKind, id: StringUuid) -> Result<()>;
}

#[derive(FromRow)]
struct NodeRow {
    id: StringUuid,
    scope_id: StringUuid,
    parent_id: Option<StringUuid>,
    name: String,
    code: String,
    level: i32,
    path: String,
    is_active: bool,
}

impl NodeRow {
    fn into_node(self, kind: NodeKind) -> HierarchyNode {
        HierarchyNode {
            id: self.id,
            kind,
            scope_id: self.scope_id,
            parent_id: self.parent_id,
            name: self.name,
            code: self.code,
            level: self.level,
            path: self.path,
            is_active: self.is_active,
        }
    }
}

fn select_nodes(kind: NodeKind) -> String {
    format!(
        "SELECT id, {} AS scope_id, parent_id, name, code, level, path, is_active FROM {}",
        kind.scope_column(),
        kind.table()
    )
}

fn lock_clause(lock: bool) -> &'static str {
    if lock {
        " FOR UPDATE"
    } else {
        ""
    }
}

async fn fetch_node<'e, E>(
    executor: E,
    kind: NodeKind,
    id: StringUuid,
    lock: bool,
) -> Result<Option<HierarchyNode>>
where
    E: Executor<'e, Database = MySql>,
{
    let sql = format!("{} WHERE id = ?{}", select_nodes(kind), lock_clause(lock));
    let row = sqlx::query_as::<_, NodeRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(|r| r.into_node(kind)))
}

async fn fetch_scope_nodes<'e, E>(
    executor: E,
    kind: NodeKind,
    scope_id: StringUuid,
    lock: bool,
) -> Result<Vec<HierarchyNode>>
where
    E: Executor<'e, Database = MySql>,
{
    let sql = format!(
        "{} WHERE {} = ? ORDER BY level, name, id{}",
        select_nodes(kind),
        kind.scope_column(),
        lock_clause(lock)
    );
    let rows = sqlx::query_as::<_, NodeRow>(&sql)
        .bind(scope_id)
        .fetch_all(executor)
        .await?;
    Ok(rows.into_iter().map(|r| r.into_node(kind)).collect())
}

async fn count_active_children<'e, E>(executor: E, kind: NodeKind, id: StringUuid) -> Result<i64>
where
    E: Executor<'e, Database = MySql>,
{
    let count: i64 = match kind {
        // a branch's units count as its children too
        NodeKind::Branch => {
            sqlx::query_scalar(
                "SELECT (SELECT COUNT(*) FROM branches WHERE parent_id = ? AND is_active = TRUE) \
                 + (SELECT COUNT(*) FROM units WHERE branch_id = ? AND is_active = TRUE)",
            )
            .bind(id)
            .bind(id)
            .fetch_one(executor)
            .await?
        }
        NodeKind::Unit => {
            sqlx::query_scalar("SELECT COUNT(*) FROM units WHERE parent_id = ? AND is_active = TRUE")
                .bind(id)
                .fetch_one(executor)
                .await?
        }
    };
    Ok(count)
}

async fn count_assignments<'e, E>(executor: E, kind: NodeKind, id: StringUuid) -> Result<i64>
where
    E: Executor<'e, Database = MySql>,
{
    let sql = format!(
        "SELECT COUNT(*) FROM user_roles WHERE {} = ?",
        kind.assignment_column()
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// Lock the owning company (branches) or branch (units) row for the rest of the transaction.
async fn lock_scope(
    conn: &mut MySqlConnection,
    kind: NodeKind,
    scope_id: StringUuid,
    require_active: bool,
) -> Result<()> {
    let (table, label) = match kind {
        NodeKind::Branch => ("companies", "Company"),
        NodeKind::Unit => ("branches", "Branch"),
    };
    let sql = format!("SELECT is_active FROM {} WHERE id = ? FOR UPDATE", table);
    let active: Option<bool> = sqlx::query_scalar(&sql)
        .bind(scope_id)
        .fetch_optional(&mut *conn)
        .await?;

    match active {
        Some(true) => Ok(()),
        Some(false) if !require_active => Ok(()),
        Some(false) => Err(AppError::NotFound(format!(
            "{} {} not found or inactive",
            label, scope_id
        ))),
        None => Err(AppError::NotFound(format!("{} {} not found", label, scope_id))),
    }
}

/// Lock `id` for update, taking its scope row first.
///
/// Every structural write locks scope before node, the order `create_in_tx` uses.
async fn lock_node(
    conn: &mut MySqlConnection,
    kind: NodeKind,
    id: StringUuid,
) -> Result<HierarchyNode> {
    let not_found = || AppError::NotFound(format!("{} {} not found", kind, id));
    // nodes never change scope, so the unlocked read is enough to find it
    let scope_id = fetch_node(&mut *conn, kind, id, false)
        .await?
        .ok_or_else(not_found)?
        .scope_id;
    lock_scope(conn, kind, scope_id, false).await?;
    fetch_node(&mut *conn, kind, id, true)
        .await?
        .ok_or_else(not_found)
}

async fn create_in_tx(
    conn: &mut MySqlConnection,
    node: &NewNode,
    max_depth: i32,
) -> Result<HierarchyNode> {
    let kind = node.kind;
    lock_scope(conn, kind, node.scope_id, true).await?;

    let parent = match node.parent_id {
        Some(parent_id) => Some(
            fetch_node(&mut *conn, kind, parent_id, true)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Parent {} {} not found", kind, parent_id))
                })?,
        ),
        None => None,
    };
    let position = plan_create(kind, node.scope_id, parent.as_ref(), max_depth)?;

    let id = StringUuid::new_v4();
    let sql = format!(
        "INSERT INTO {} (id, {}, parent_id, name, code, level, path, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, TRUE, NOW(), NOW())",
        kind.table(),
        kind.scope_column()
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(node.scope_id)
        .bind(node.parent_id)
        .bind(&node.name)
        .bind(&node.code)
        .bind(position.level)
        .bind(&position.path)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            conflict_on_duplicate(e, format!("{} code '{}' already exists", kind, node.code))
        })?;

    Ok(HierarchyNode {
        id,
        kind,
        scope_id: node.scope_id,
        parent_id: node.parent_id,
        name: node.name.clone(),
        code: node.code.clone(),
        level: position.level,
        path: position.path,
        is_active: true,
    })
}

async fn update_in_tx(
    conn: &mut MySqlConnection,
    kind: NodeKind,
    id: StringUuid,
    input: &UpdateNodeInput,
    max_depth: i32,
) -> Result<HierarchyNode> {
    let node = lock_node(conn, kind, id).await?;

    if let Some(new_parent_id) = input.parent_change(node.parent_id) {
        let scope_nodes = fetch_scope_nodes(&mut *conn, kind, node.scope_id, true).await?;

        let new_parent = match new_parent_id {
            Some(parent_id) => {
                let found = match scope_nodes.iter().find(|n| n.id == parent_id) {
                    Some(n) => Some(n.clone()),
                    // outside the scope: fetched only so the scope check can reject it
                    None => fetch_node(&mut *conn, kind, parent_id, false).await?,
                };
                Some(found.ok_or_else(|| {
                    AppError::NotFound(format!("Parent {} {} not found", kind, parent_id))
                })?)
            }
            None => None,
        };

        let updates = plan_reparent(&scope_nodes, id, new_parent.as_ref(), max_depth)?;
        let sql = format!(
            "UPDATE {} SET parent_id = ?, level = ?, path = ?, updated_at = NOW() WHERE id = ?",
            kind.table()
        );
        for update in &updates {
            sqlx::query(&sql)
                .bind(update.parent_id)
                .bind(update.level)
                .bind(&update.path)
                .bind(update.id)
                .execute(&mut *conn)
                .await?;
        }
        tracing::debug!(node_id = %id, rewritten = updates.len(), "Reparented subtree");
    }

    if input.is_active == Some(false) && node.is_active {
        ensure_deletable(conn, kind, id).await?;
    }

    let sql = format!(
        "UPDATE {} SET name = COALESCE(?, name), code = COALESCE(?, code), \
         is_active = COALESCE(?, is_active), updated_at = NOW() WHERE id = ?",
        kind.table()
    );
    sqlx::query(&sql)
        .bind(&input.name)
        .bind(&input.code)
        .bind(input.is_active)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| conflict_on_duplicate(e, format!("{} code already exists", kind)))?;

    fetch_node(&mut *conn, kind, id, false)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {} not found", kind, id)))
}

/// Deactivation guard: no active children, no assigned users.
async fn ensure_deletable(conn: &mut MySqlConnection, kind: NodeKind, id: StringUuid) -> Result<()> {
    if count_active_children(&mut *conn, kind, id).await? > 0 {
        return Err(AppError::Conflict(format!(
            "{} {} has active children",
            kind, id
        )));
    }
    if count_assignments(&mut *conn, kind, id).await? > 0 {
        return Err(AppError::Conflict(format!(
            "{} {} has users assigned",
            kind, id
        )));
    }
    Ok(())
}

async fn soft_delete_in_tx(conn: &mut MySqlConnection, kind: NodeKind, id: StringUuid) -> Result<()> {
    let node = lock_node(conn, kind, id).await?;
    if !node.is_active {
        return Ok(());
    }
    ensure_deletable(conn, kind, id).await?;

    let sql = format!(
        "UPDATE {} SET is_active = FALSE, updated_at = NOW() WHERE id = ?",
        kind.table()
    );
    sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(())
}

pub struct HierarchyRepositoryImpl {
    pool: MySqlPool,
}

impl HierarchyRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HierarchyRepository for HierarchyRepositoryImpl {
    async fn find_company(&self, id: StringUuid) -> Result<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(
            "SELECT id, name, code, is_active, created_at, updated_at FROM companies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(company)
    }

    async fn find_node(&self, kind: NodeKind, id: StringUuid) -> Result<Option<HierarchyNode>> {
        fetch_node(&self.pool, kind, id, false).await
    }

    async fn list_nodes(&self, kind: NodeKind, scope_id: StringUuid) -> Result<Vec<HierarchyNode>> {
        fetch_scope_nodes(&self.pool, kind, scope_id, false).await
    }

    async fn exists_by_code(
        &self,
        kind: NodeKind,
        scope_id: StringUuid,
        code: &str,
        exclude_id: Option<StringUuid>,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ? AND code = ? AND (? IS NULL OR id <> ?)",
            kind.table(),
            kind.scope_column()
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(scope_id)
            .bind(code)
            .bind(exclude_id)
            .bind(exclude_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn has_children(&self, kind: NodeKind, id: StringUuid) -> Result<bool> {
        Ok(count_active_children(&self.pool, kind, id).await? > 0)
    }

    async fn has_assigned_users(&self, kind: NodeKind, id: StringUuid) -> Result<bool> {
        Ok(count_assignments(&self.pool, kind, id).await? > 0)
    }

    async fn create_node(&self, node: &NewNode, max_depth: i32) -> Result<HierarchyNode> {
        let mut tx = self.pool.begin().await?;
        let outcome = create_in_tx(&mut tx, node, max_depth).await;
        finish_transaction(tx, outcome).await
    }

    async fn update_node(
        &self,
        kind: NodeKind,
        id: StringUuid,
        input: &UpdateNodeInput,
        max_depth: i32,
    ) -> Result<HierarchyNode> {
        let mut tx = self.pool.begin().await?;
        let outcome = update_in_tx(&mut tx, kind, id, input, max_depth).await;
        finish_transaction(tx, outcome).await
    }

    async fn soft_delete_node(&self, kind: NodeKind, id: StringUuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let outcome = soft_delete_in_tx(&mut tx, kind, id).await;
        finish_transaction(tx, outcome).await
    }
}
