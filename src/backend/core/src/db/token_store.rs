use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::tokens::{AuthToken, TokenStore};

/// [`TokenStore`] over the `auth_tokens` table.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: &AuthToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO auth_tokens
                (id, secret_hash, policy_type, project_id, user_id, expires_at, created_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.id)
        .bind(&token.secret_hash)
        .bind(&token.policy_type)
        .bind(&token.project_id)
        .bind(&token.user_id)
        .bind(token.expires_at)
        .bind(token.created_at)
        .bind(token.last_used_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active(
        &self,
        secret_hash: &str,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthToken>> {
        let token = sqlx::query_as::<_, AuthToken>(
            r#"
            SELECT id, secret_hash, policy_type, project_id, user_id, expires_at, created_at, last_used_at
            FROM auth_tokens
            WHERE secret_hash = $1
              AND project_id = $2
              AND (expires_at IS NULL OR expires_at > $3)
            "#,
        )
        .bind(secret_hash)
        .bind(project_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE auth_tokens SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, project_id: &str) -> Result<Vec<AuthToken>> {
        let tokens = sqlx::query_as::<_, AuthToken>(
            r#"
            SELECT id, secret_hash, policy_type, project_id, user_id, expires_at, created_at, last_used_at
            FROM auth_tokens
            WHERE project_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }
}
