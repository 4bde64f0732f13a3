//! Wiring from configuration to the core services.

use anyhow::{Context, Result};
use std::sync::Arc;

use bastion_core::config::Config;
use bastion_core::db::Database;
use bastion_core::rbac::{EngineLifecycle, PolicyManager};
use bastion_core::tokens::CredentialService;

/// Services the commands operate on, all sharing one pool.
pub struct Backend {
    pub db: Database,
    pub lifecycle: EngineLifecycle,
    pub manager: PolicyManager,
    pub credentials: CredentialService,
}

/// Load configuration from `path` when given, otherwise from the environment.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => Config::load().context(
            "Failed to load configuration from the environment (is BASTION__DATABASE__URL set?)",
        )?,
    };
    Ok(config)
}

impl Backend {
    pub async fn connect(config: &Config) -> Result<Self> {
        let db = Database::new(&config.database)
            .await
            .context("Failed to connect to the database")?;

        let lifecycle = EngineLifecycle::new(Arc::new(db.policy_store()));
        let manager = PolicyManager::new(lifecycle.clone());
        let credentials = CredentialService::new(
            Arc::new(db.token_store()),
            lifecycle.clone(),
            config.tokens.clone(),
        );

        Ok(Self {
            db,
            lifecycle,
            manager,
            credentials,
        })
    }
}
