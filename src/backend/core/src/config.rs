//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::telemetry::LoggingConfig;

const ENV_PREFIX: &str = "BASTION";

/// Main configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Enforcement engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Credential configuration
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Reload the rule set from the store every N seconds.
    ///
    /// Unset by default: writes from other processes become visible only
    /// after an explicit reload.
    pub reload_interval_secs: Option<u64>,
}

impl EngineConfig {
    pub fn reload_interval(&self) -> Option<Duration> {
        self.reload_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Prefix prepended to every issued secret
    #[serde(default = "default_token_prefix")]
    pub prefix: String,

    /// Random characters after the prefix
    #[serde(default = "default_secret_length")]
    pub secret_length: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            prefix: default_token_prefix(),
            secret_length: default_secret_length(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_acquire_timeout_secs() -> u64 { 5 }
fn default_token_prefix() -> String { "bst_".to_string() }
fn default_secret_length() -> usize { 48 }

impl Config {
    /// Load configuration from the environment (`BASTION__DATABASE__URL`, ...).
    pub fn load() -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://localhost/bastion" }
        }))
        .unwrap();

        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.tokens.prefix, "bst_");
        assert!(cfg.engine.reload_interval().is_none());
    }

    #[test]
    fn test_zero_reload_interval_disables_refresh() {
        let engine = EngineConfig {
            reload_interval_secs: Some(0),
        };
        assert!(engine.reload_interval().is_none());

        let engine = EngineConfig {
            reload_interval_secs: Some(30),
        };
        assert_eq!(engine.reload_interval(), Some(Duration::from_secs(30)));
    }
}
