use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::context::{Membership, OrganizationRecord, ProjectRecord, TenantDirectory, UserRecord};
use crate::error::Result;
use crate::rbac::models::Role;

/// [`TenantDirectory`] over the `users`, `organizations`,
/// `organization_members` and `projects` tables.
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    principal_id: String,
    email: Option<String>,
    name: Option<String>,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            principal_id: row.principal_id,
            email: row.email,
            name: row.name,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    organization_id: String,
    organization_name: String,
    role: String,
}

impl MembershipRow {
    fn into_membership(self) -> Option<Membership> {
        match self.role.parse::<Role>() {
            Ok(role) => Some(Membership {
                organization: OrganizationRecord {
                    id: self.organization_id,
                    name: self.organization_name,
                },
                role,
            }),
            Err(e) => {
                warn!(organization_id = %self.organization_id, error = %e, "Skipping membership with unknown role");
                None
            }
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: String,
    organization_id: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<ProjectRow> for ProjectRecord {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn user_by_principal(&self, principal_id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, principal_id, email, name FROM users WHERE principal_id = $1",
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn memberships(&self, user_id: &str) -> Result<Vec<Membership>> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT o.id AS organization_id, o.name AS organization_name, m.role
            FROM organization_members m
            JOIN organizations o ON o.id = m.organization_id
            WHERE m.user_id = $1
            ORDER BY m.created_at, o.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(MembershipRow::into_membership).collect())
    }

    async fn first_project(&self, organization_id: &str) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, organization_id, name, created_at
            FROM projects
            WHERE organization_id = $1
            ORDER BY created_at, id
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, organization_id, name, created_at FROM projects WHERE id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn membership_role(&self, user_id: &str, organization_id: &str) -> Result<Option<Role>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM organization_members WHERE user_id = $1 AND organization_id = $2",
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role.and_then(|r| r.parse().ok()))
    }

    async fn project_access(&self, user_id: &str, project_id: &str) -> Result<Option<Role>> {
        let role: Option<String> = sqlx::query_scalar(
            r#"
            SELECT m.role
            FROM projects p
            JOIN organization_members m ON m.organization_id = p.organization_id
            WHERE p.id = $1 AND m.user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role.and_then(|r| r.parse().ok()))
    }

    async fn projects(&self) -> Result<Vec<ProjectRecord>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, organization_id, name, created_at FROM projects ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
