//! PostgreSQL persistence.
//!
//! Uses sqlx with runtime-checked queries. Each collaborator trait of the core
//! has a Postgres implementation here sharing one pool.

mod directory;
mod policy_store;
mod token_store;

pub use directory::PgTenantDirectory;
pub use policy_store::PgPolicyStore;
pub use token_store::PgTokenStore;

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{AuthzError, Result};

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Database pool established"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AuthzError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn policy_store(&self) -> PgPolicyStore {
        PgPolicyStore::new(self.pool.clone())
    }

    pub fn token_store(&self) -> PgTokenStore {
        PgTokenStore::new(self.pool.clone())
    }

    pub fn tenant_directory(&self) -> PgTenantDirectory {
        PgTenantDirectory::new(self.pool.clone())
    }
}
