use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;
use crate::rbac::store::{CasbinRule, PolicyStore};

/// Empty strings stand in for NULL value columns left by other adapters.
const LOAD_RULES_SQL: &str = r#"
    SELECT ptype,
           COALESCE(v0, '') AS v0,
           COALESCE(v1, '') AS v1,
           COALESCE(v2, '') AS v2,
           COALESCE(v3, '') AS v3,
           COALESCE(v4, '') AS v4,
           COALESCE(v5, '') AS v5
    FROM casbin_rule
    ORDER BY id
"#;

/// [`PolicyStore`] over the `casbin_rule` table.
#[derive(Clone)]
pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn load_rules(&self) -> Result<Vec<CasbinRule>> {
        let rows = sqlx::query_as::<_, CasbinRule>(LOAD_RULES_SQL)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = rows.len(), "Loaded casbin_rule rows");
        Ok(rows)
    }

    async fn add_rule(&self, rule: &CasbinRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO casbin_rule (ptype, v0, v1, v2, v3, v4, v5)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (ptype, v0, v1, v2, v3, v4, v5) DO NOTHING
            "#,
        )
        .bind(&rule.ptype)
        .bind(&rule.v0)
        .bind(&rule.v1)
        .bind(&rule.v2)
        .bind(&rule.v3)
        .bind(&rule.v4)
        .bind(&rule.v5)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_rule(&self, rule: &CasbinRule) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM casbin_rule
            WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4
              AND v3 = $5 AND v4 = $6 AND v5 = $7
            "#,
        )
        .bind(&rule.ptype)
        .bind(&rule.v0)
        .bind(&rule.v1)
        .bind(&rule.v2)
        .bind(&rule.v3)
        .bind(&rule.v4)
        .bind(&rule.v5)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
