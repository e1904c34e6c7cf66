//! Data access layer (Repository pattern)

pub mod assignment;
pub mod hierarchy;
pub mod permission;
pub mod role_grant;
pub mod subscription;
pub mod unit_role;

pub use assignment::AssignmentRepository;
pub use hierarchy::HierarchyRepository;
pub use permission::{PermissionSnapshot, PermissionSnapshotRepository};
pub use role_grant::RoleGrantRepository;
pub use subscription::SubscriptionRepository;
pub use unit_role::UnitRoleRepository;

use crate::domain::StringUuid;
use crate::error::{AppError, Result};
use sqlx::{MySql, MySqlPool, QueryBuilder, Transaction};

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    pool: MySqlPool,
}

impl DbPool {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn inner(&self) -> &MySqlPool {
        &self.pool
    }
}

impl std::ops::Deref for DbPool {
    type Target = MySqlPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

/// Commit on success, roll back on failure.
///
/// Raw sqlx errors from inside the transaction come back as
/// `TransactionFailure`; business-rule errors keep their variant.
pub(crate) async fn finish_transaction<T>(
    tx: Transaction<'_, MySql>,
    outcome: Result<T>,
) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| AppError::from(e).in_transaction())?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err.in_transaction())
        }
    }
}

/// Map a unique-key violation onto `Conflict`, anything else onto `Database`.
pub(crate) fn conflict_on_duplicate(err: sqlx::Error, message: impl Into<String>) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AppError::Conflict(message.into());
        }
    }
    AppError::Database(err)
}

/// Append `(?, ?, ...)` binding every id; callers skip empty lists.
pub(crate) fn push_id_list(builder: &mut QueryBuilder<'_, MySql>, ids: &[StringUuid]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

/// Module ids from `ids` that exist, whether active or not.
pub(crate) async fn existing_module_ids(
    pool: &MySqlPool,
    ids: &[StringUuid],
) -> Result<Vec<StringUuid>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<MySql>::new("SELECT id FROM modules WHERE id IN ");
    push_id_list(&mut builder, ids);
    let found = builder
        .build_query_scalar::<StringUuid>()
        .fetch_all(pool)
        .await?;
    Ok(found)
}
