//! Credential service: issuing and checking policy-bound bearer tokens.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{AuthToken, TokenStore};
use crate::config::TokenConfig;
use crate::error::{AuthzError, Result};
use crate::rbac::lifecycle::EngineLifecycle;
use crate::rbac::models::{Action, Domain, Resource};
use crate::rbac::roles::ApiScope;
use crate::telemetry::metrics::{self, TokenCheckOutcome};

const SECRET_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A freshly created token together with its raw secret.
///
/// The secret is not recoverable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: AuthToken,
    pub secret: String,
}

/// Issues, checks and revokes [`AuthToken`]s.
#[derive(Clone)]
pub struct CredentialService {
    tokens: Arc<dyn TokenStore>,
    lifecycle: EngineLifecycle,
    config: TokenConfig,
}

impl CredentialService {
    pub fn new(tokens: Arc<dyn TokenStore>, lifecycle: EngineLifecycle, config: TokenConfig) -> Self {
        Self {
            tokens,
            lifecycle,
            config,
        }
    }

    fn generate_secret(&self) -> String {
        let mut rng = rand::rng();
        let body: String = (0..self.config.secret_length)
            .map(|_| SECRET_ALPHABET[rng.random_range(0..SECRET_ALPHABET.len())] as char)
            .collect();
        format!("{}{}", self.config.prefix, body)
    }

    /// Hex SHA-256 of a raw secret, as persisted.
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Issuing
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate an issuing request and compute its expiry relative to `now`.
    fn expiry_at(
        project_id: &str,
        policy_type: &str,
        expires_in_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Domain::parse(project_id)?;
        if policy_type.trim().is_empty() {
            return Err(AuthzError::invalid_input("Policy type must not be empty"));
        }
        match expires_in_days {
            None => Ok(None),
            Some(0) => Err(AuthzError::invalid_input("Expiry must be at least one day")),
            Some(days) => now
                .checked_add_signed(Duration::days(i64::from(days)))
                .map(Some)
                .ok_or_else(|| {
                    AuthzError::invalid_input("Expiry is too far in the future")
                        .with_internal_message(format!("expires_in_days={days}"))
                }),
        }
    }

    /// Create a token bound to `policy_type` in `project_id`.
    ///
    /// Without `expires_in_days` the token never expires.
    pub async fn create_token(
        &self,
        project_id: &str,
        policy_type: &str,
        expires_in_days: Option<u32>,
        user_id: Option<&str>,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = Self::expiry_at(project_id, policy_type, expires_in_days, now)?;
        self.issue(project_id, policy_type, expires_at, now, user_id)
            .await
    }

    async fn issue(
        &self,
        project_id: &str,
        policy_type: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> Result<IssuedToken> {
        let secret = self.generate_secret();
        let token = AuthToken {
            id: Uuid::new_v4(),
            secret_hash: Self::hash_secret(&secret),
            policy_type: policy_type.to_string(),
            project_id: project_id.to_string(),
            user_id: user_id.map(str::to_string),
            expires_at,
            created_at: now,
            last_used_at: None,
        };

        self.tokens.insert(&token).await?;
        info!(
            token_id = %token.id,
            project_id,
            policy_type,
            expires_at = ?token.expires_at,
            "Auth token created"
        );
        Ok(IssuedToken { token, secret })
    }

    /// Provision a fresh policy type carrying `scope`'s grants in the project,
    /// then issue a token bound to it.
    ///
    /// The request is validated before anything is provisioned. If storing the
    /// token fails, the provisioned rules are removed again.
    pub async fn create_api_token(
        &self,
        project_id: &str,
        scope: ApiScope,
        expires_in_days: Option<u32>,
    ) -> Result<IssuedToken> {
        let domain = Domain::parse(project_id)?;
        let policy_type = format!("api_{}_{}", scope, Uuid::new_v4().simple());
        let now = Utc::now();
        let expires_at = Self::expiry_at(project_id, &policy_type, expires_in_days, now)?;

        let engine = self.lifecycle.init().await?;
        let rules = scope.policy_rules(&policy_type, &domain);
        engine.add_policies(rules.iter().cloned()).await?;

        match self
            .issue(project_id, &policy_type, expires_at, now, None)
            .await
        {
            Ok(issued) => Ok(issued),
            Err(err) => {
                for rule in &rules {
                    if let Err(cleanup) = engine.remove_policy(rule).await {
                        warn!(rule = %rule, error = %cleanup, "Failed to remove orphaned API token rule");
                    }
                }
                Err(err)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checking
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the bearer of `secret` may perform `action` on `resource` in
    /// `project_id`. Unknown, expired or foreign tokens deny without
    /// consulting the engine.
    pub async fn check_token_permission(
        &self,
        secret: &str,
        resource: Resource,
        action: Action,
        project_id: &str,
    ) -> Result<bool> {
        self.check_token_permission_at(secret, resource, action, project_id, Utc::now())
            .await
    }

    /// [`check_token_permission`](Self::check_token_permission) evaluated at `now`.
    pub async fn check_token_permission_at(
        &self,
        secret: &str,
        resource: Resource,
        action: Action,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let hash = Self::hash_secret(secret);
        let Some(token) = self.tokens.find_active(&hash, project_id, now).await? else {
            metrics::record_token_check(TokenCheckOutcome::Invalid);
            debug!(project_id, "Token unknown, expired or bound to another project");
            return Ok(false);
        };

        self.tokens.touch(token.id, now).await?;

        let engine = self.lifecycle.init().await?;
        let allowed = engine.enforce(
            &token.policy_type,
            resource,
            action,
            &Domain::new(project_id),
        );
        metrics::record_token_check(if allowed {
            TokenCheckOutcome::Allowed
        } else {
            TokenCheckOutcome::Denied
        });
        Ok(allowed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn revoke_token(&self, token_id: Uuid) -> Result<()> {
        if !self.tokens.delete(token_id).await? {
            return Err(AuthzError::token_not_found(token_id));
        }
        info!(token_id = %token_id, "Auth token revoked");
        Ok(())
    }

    pub async fn list_tokens(&self, project_id: &str) -> Result<Vec<AuthToken>> {
        self.tokens.list(project_id).await
    }
}
