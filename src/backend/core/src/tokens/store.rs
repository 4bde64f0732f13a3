//! Auth token records and their storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;

/// A bearer credential bound to a policy type within one project.
///
/// Only the SHA-256 digest of the secret is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AuthToken {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub policy_type: String,
    pub project_id: String,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// `expires_at` is exclusive: a token expiring exactly at `now` is invalid.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    async fn insert(&self, token: &AuthToken) -> Result<()>;

    /// The token with this secret digest in this project, if unexpired at `now`.
    async fn find_active(
        &self,
        secret_hash: &str,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthToken>>;

    /// Record a use.
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Returns `false` if no such token existed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Tokens of a project, newest first.
    async fn list(&self, project_id: &str) -> Result<Vec<AuthToken>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<Uuid, AuthToken>,
    ids_by_hash: DashMap<String, Uuid>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<AuthToken> {
        self.tokens.get(&id).map(|t| t.clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: &AuthToken) -> Result<()> {
        self.ids_by_hash.insert(token.secret_hash.clone(), token.id);
        self.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_active(
        &self,
        secret_hash: &str,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthToken>> {
        let Some(id) = self.ids_by_hash.get(secret_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self
            .tokens
            .get(&id)
            .filter(|t| t.project_id == project_id && t.is_valid_at(now))
            .map(|t| t.clone()))
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut token) = self.tokens.get_mut(&id) {
            token.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        match self.tokens.remove(&id) {
            Some((_, token)) => {
                self.ids_by_hash.remove(&token.secret_hash);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, project_id: &str) -> Result<Vec<AuthToken>> {
        let mut tokens: Vec<_> = self
            .tokens
            .iter()
            .filter(|t| t.project_id == project_id)
            .map(|t| t.value().clone())
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }
}
