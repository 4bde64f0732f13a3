//! Auth token issuing and permission checks.

use std::sync::Arc;

use async_trait::async_trait;
use bastion_core::config::TokenConfig;
use bastion_core::error::{AuthzError, ErrorCode, Result};
use bastion_core::rbac::{
    Action, ApiScope, Domain, EngineLifecycle, MemoryPolicyStore, PolicyManager, Resource, Role,
};
use bastion_core::tokens::{AuthToken, CredentialService, MemoryTokenStore, TokenStore};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

// ============================================================================
// Test Utilities
// ============================================================================

struct Harness {
    lifecycle: EngineLifecycle,
    tokens: Arc<MemoryTokenStore>,
    service: CredentialService,
}

fn harness() -> Harness {
    let lifecycle = EngineLifecycle::new(MemoryPolicyStore::new_shared());
    let tokens = Arc::new(MemoryTokenStore::new());
    let service = CredentialService::new(tokens.clone(), lifecycle.clone(), TokenConfig::default());
    Harness {
        lifecycle,
        tokens,
        service,
    }
}

/// Accepts nothing: every insert fails.
struct RejectingTokenStore;

#[async_trait]
impl TokenStore for RejectingTokenStore {
    async fn insert(&self, _token: &AuthToken) -> Result<()> {
        Err(AuthzError::new(ErrorCode::StoreUnavailable, "token table unreachable"))
    }

    async fn find_active(
        &self,
        _secret_hash: &str,
        _project_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<Option<AuthToken>> {
        Ok(None)
    }

    async fn touch(&self, _id: Uuid, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _id: Uuid) -> Result<bool> {
        Ok(false)
    }

    async fn list(&self, _project_id: &str) -> Result<Vec<AuthToken>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// API tokens
// ============================================================================

#[tokio::test]
async fn test_read_scope_token() {
    let h = harness();
    let issued = h
        .service
        .create_api_token("proj-1", ApiScope::Read, None)
        .await
        .unwrap();

    assert!(h
        .service
        .check_token_permission(&issued.secret, Resource::Campaign, Action::Read, "proj-1")
        .await
        .unwrap());
    assert!(!h
        .service
        .check_token_permission(&issued.secret, Resource::Campaign, Action::Delete, "proj-1")
        .await
        .unwrap());
    assert!(!h
        .service
        .check_token_permission(&issued.secret, Resource::Campaign, Action::Read, "proj-2")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_write_scope_token() {
    let h = harness();
    let issued = h
        .service
        .create_api_token("proj-1", ApiScope::Write, Some(30))
        .await
        .unwrap();

    let check = |resource, action| {
        let service = h.service.clone();
        let secret = issued.secret.clone();
        async move {
            service
                .check_token_permission(&secret, resource, action, "proj-1")
                .await
                .unwrap()
        }
    };
    assert!(check(Resource::Reward, Action::Create).await);
    assert!(check(Resource::Customer, Action::Update).await);
    assert!(!check(Resource::Customer, Action::Delete).await);
    assert!(!check(Resource::Billing, Action::Read).await);
}

#[tokio::test]
async fn test_admin_tokens_get_independent_policy_types() {
    let h = harness();
    let first = h
        .service
        .create_api_token("proj-1", ApiScope::Admin, None)
        .await
        .unwrap();
    let second = h
        .service
        .create_api_token("proj-1", ApiScope::Admin, None)
        .await
        .unwrap();

    assert_ne!(first.token.policy_type, second.token.policy_type);
    assert!(first.token.policy_type.starts_with("api_admin_"));

    let engine = h.lifecycle.init().await.unwrap();
    let rules = engine.policies_in_domain(&Domain::new("proj-1"));
    assert_eq!(rules.len(), 2);
    assert!(h
        .service
        .check_token_permission(&second.secret, Resource::Billing, Action::Delete, "proj-1")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_api_token_with_unrepresentable_expiry_provisions_nothing() {
    let h = harness();
    let err = h
        .service
        .create_api_token("proj-1", ApiScope::Admin, Some(u32::MAX))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);

    // Rejected before the engine was touched.
    assert_eq!(h.lifecycle.load_count(), 0);
    let engine = h.lifecycle.init().await.unwrap();
    assert!(engine.policies_in_domain(&Domain::new("proj-1")).is_empty());
    assert!(h.service.list_tokens("proj-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_token_insert_removes_provisioned_rules() {
    let lifecycle = EngineLifecycle::new(MemoryPolicyStore::new_shared());
    let service = CredentialService::new(
        Arc::new(RejectingTokenStore),
        lifecycle.clone(),
        TokenConfig::default(),
    );

    let err = service
        .create_api_token("proj-1", ApiScope::Write, Some(7))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StoreUnavailable);

    let engine = lifecycle.init().await.unwrap();
    assert!(engine.policies_in_domain(&Domain::new("proj-1")).is_empty());
}

// ============================================================================
// Validity
// ============================================================================

#[tokio::test]
async fn test_expiry_boundary() {
    let h = harness();
    let issued = h
        .service
        .create_api_token("proj-1", ApiScope::Admin, Some(1))
        .await
        .unwrap();
    let expires_at = issued.token.expires_at.unwrap();

    let at = |now| {
        let service = h.service.clone();
        let secret = issued.secret.clone();
        async move {
            service
                .check_token_permission_at(&secret, Resource::Project, Action::Read, "proj-1", now)
                .await
                .unwrap()
        }
    };

    assert!(at(expires_at - Duration::seconds(1)).await);
    assert!(!at(expires_at).await);
    assert!(!at(expires_at + Duration::days(1)).await);
}

#[tokio::test]
async fn test_unrepresentable_expiry_is_rejected() {
    let h = harness();
    let err = h
        .service
        .create_token("proj-1", "api_x", Some(u32::MAX), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    assert!(h.service.list_tokens("proj-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_token_without_expiry_never_expires() {
    let h = harness();
    let issued = h
        .service
        .create_api_token("proj-1", ApiScope::Read, None)
        .await
        .unwrap();

    let far_future = Utc::now() + Duration::days(365 * 50);
    assert!(h
        .service
        .check_token_permission_at(&issued.secret, Resource::Reward, Action::Read, "proj-1", far_future)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_invalid_token_skips_engine() {
    let h = harness();
    assert!(!h
        .service
        .check_token_permission("bst_bogus", Resource::Project, Action::Read, "proj-1")
        .await
        .unwrap());
    // The engine was never needed, so it was never loaded.
    assert_eq!(h.lifecycle.load_count(), 0);
}

#[tokio::test]
async fn test_check_records_last_use() {
    let h = harness();
    let issued = h
        .service
        .create_api_token("proj-1", ApiScope::Read, None)
        .await
        .unwrap();
    assert!(h.tokens.get(issued.token.id).unwrap().last_used_at.is_none());

    h.service
        .check_token_permission(&issued.secret, Resource::Campaign, Action::Delete, "proj-1")
        .await
        .unwrap();
    assert!(h.tokens.get(issued.token.id).unwrap().last_used_at.is_some());
}

// ============================================================================
// Tokens bound to role subjects
// ============================================================================

#[tokio::test]
async fn test_token_bound_to_existing_role_policy() {
    let h = harness();
    let manager = PolicyManager::new(h.lifecycle.clone());
    manager.setup_project_policies("proj-1").await.unwrap();

    let issued = h
        .service
        .create_token("proj-1", Role::Viewer.as_str(), None, Some("user-9"))
        .await
        .unwrap();

    assert!(h
        .service
        .check_token_permission(&issued.secret, Resource::Membership, Action::Read, "proj-1")
        .await
        .unwrap());
    assert!(!h
        .service
        .check_token_permission(&issued.secret, Resource::Membership, Action::Update, "proj-1")
        .await
        .unwrap());
}

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn test_revoke_and_list() {
    let h = harness();
    let a = h
        .service
        .create_api_token("proj-1", ApiScope::Read, None)
        .await
        .unwrap();
    h.service
        .create_api_token("proj-1", ApiScope::Write, None)
        .await
        .unwrap();
    h.service
        .create_api_token("proj-2", ApiScope::Read, None)
        .await
        .unwrap();

    assert_eq!(h.service.list_tokens("proj-1").await.unwrap().len(), 2);

    h.service.revoke_token(a.token.id).await.unwrap();
    assert_eq!(h.service.list_tokens("proj-1").await.unwrap().len(), 1);
    assert!(!h
        .service
        .check_token_permission(&a.secret, Resource::Campaign, Action::Read, "proj-1")
        .await
        .unwrap());
    assert!(h.service.revoke_token(a.token.id).await.is_err());
}
