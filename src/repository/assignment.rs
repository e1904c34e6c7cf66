//! User-role assignment repository

use crate::domain::{StringUuid, UserRoleAssignment};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn role_exists(&self, role_id: StringUuid) -> Result<bool>;
    async fn create(&self, assignment: &UserRoleAssignment) -> Result<UserRoleAssignment>;
    async fn find_by_id(&self, id: StringUuid) -> Result<Option<UserRoleAssignment>>;
    async fn list_by_user(&self, user_id: StringUuid) -> Result<Vec<UserRoleAssignment>>;
    /// Same user, role and (company, branch, unit) scope already assigned
    async fn exists(&self, assignment: &UserRoleAssignment) -> Result<bool>;
    async fn delete(&self, id: StringUuid) -> Result<()>;
}

pub struct AssignmentRepositoryImpl {
    pool: MySqlPool,
}

impl AssignmentRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentRepository for AssignmentRepositoryImpl {
    async fn role_exists(&self, role_id: StringUuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE id = ?")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn create(&self, assignment: &UserRoleAssignment) -> Result<UserRoleAssignment> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (id, user_id, role_id, company_id, branch_id, unit_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, NOW())
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.user_id)
        .bind(assignment.role_id)
        .bind(assignment.company_id)
        .bind(assignment.branch_id)
        .bind(assignment.unit_id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(assignment.id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create assignment")))
    }

    async fn find_by_id(&self, id: StringUuid) -> Result<Option<UserRoleAssignment>> {
        let assignment = sqlx::query_as::<_, UserRoleAssignment>(
            "SELECT id, user_id, role_id, company_id, branch_id, unit_id FROM user_roles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(assignment)
    }

    async fn list_by_user(&self, user_id: StringUuid) -> Result<Vec<UserRoleAssignment>> {
        let assignments = sqlx::query_as::<_, UserRoleAssignment>(
            r#"
            SELECT id, user_id, role_id, company_id, branch_id, unit_id
            FROM user_roles
            WHERE user_id = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(assignments)
    }

    async fn exists(&self, assignment: &UserRoleAssignment) -> Result<bool> {
        // <=> is MySQL's NULL-safe equality
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_roles
            WHERE user_id = ? AND role_id = ? AND company_id = ?
              AND branch_id <=> ? AND unit_id <=> ?
            "#,
        )
        .bind(assignment.user_id)
        .bind(assignment.role_id)
        .bind(assignment.company_id)
        .bind(assignment.branch_id)
        .bind(assignment.unit_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn delete(&self, id: StringUuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM user_roles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Assignment {} not found", id)));
        }
        Ok(())
    }
}
