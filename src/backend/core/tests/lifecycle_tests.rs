//! Exactly-once initialization of the engine lifecycle under concurrency.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bastion_core::error::{AuthzError, ErrorCode, Result};
use bastion_core::rbac::store::CasbinRule;
use bastion_core::rbac::{
    Action, EngineLifecycle, EngineState, MemoryPolicyStore, PolicyRule, PolicyStore, Resource,
    Role, RoleAssignment,
};
use futures::future::join_all;

// ============================================================================
// Test Stores
// ============================================================================

/// Counts loads and sleeps before answering; optionally fails.
struct SlowStore {
    inner: MemoryPolicyStore,
    loads: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
}

impl SlowStore {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryPolicyStore::with_rules(
                vec![PolicyRule::new(Role::Owner, Resource::All, Action::All, "org-1")],
                vec![RoleAssignment::new("user-1", Role::Owner, "org-1")],
            ),
            loads: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
        })
    }

    fn failing(delay: Duration) -> Arc<Self> {
        let store = Self::new(delay);
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyStore for SlowStore {
    async fn load_rules(&self) -> Result<Vec<CasbinRule>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthzError::new(ErrorCode::StoreUnavailable, "database unreachable"));
        }
        self.inner.load_rules().await
    }

    async fn add_rule(&self, rule: &CasbinRule) -> Result<()> {
        self.inner.add_rule(rule).await
    }

    async fn remove_rule(&self, rule: &CasbinRule) -> Result<()> {
        self.inner.remove_rule(rule).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_init_loads_once() {
    let store = SlowStore::new(Duration::from_millis(50));
    let lifecycle = EngineLifecycle::new(store.clone());

    let results = join_all((0..64).map(|_| lifecycle.init())).await;

    assert_eq!(store.loads(), 1);
    assert_eq!(lifecycle.load_count(), 1);
    let engines: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(engines.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert!(engines[0].enforce_str("user-1", "billing", "read", "org-1"));
    assert_eq!(lifecycle.state(), EngineState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_init_across_tasks() {
    let store = SlowStore::new(Duration::from_millis(50));
    let lifecycle = EngineLifecycle::new(store.clone());

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.init().await })
        })
        .collect();

    for handle in join_all(handles).await {
        assert!(handle.unwrap().is_ok());
    }
    assert_eq!(store.loads(), 1);
}

#[tokio::test]
async fn test_failed_init_reaches_every_waiter_then_retries() {
    let store = SlowStore::failing(Duration::from_millis(20));
    let lifecycle = EngineLifecycle::new(store.clone());

    let results = join_all((0..16).map(|_| lifecycle.init())).await;

    assert_eq!(store.loads(), 1);
    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InitializationFailed);
        // The store error is re-coded, not wrapped in a second error.
        assert_eq!(
            err.internal_message(),
            Some("StoreUnavailable: database unreachable")
        );
    }
    assert_eq!(lifecycle.state(), EngineState::Uninitialized);

    store.fail.store(false, Ordering::SeqCst);
    assert!(lifecycle.init().await.is_ok());
    assert_eq!(store.loads(), 2);
}

#[tokio::test]
async fn test_abandoned_init_still_completes() {
    let store = SlowStore::new(Duration::from_millis(50));
    let lifecycle = EngineLifecycle::new(store.clone());

    let abandoned = tokio::time::timeout(Duration::from_millis(5), lifecycle.init()).await;
    assert!(abandoned.is_err());
    assert_eq!(lifecycle.state(), EngineState::Initializing);

    let engine = lifecycle.init().await.unwrap();
    assert!(engine.enforce_str("user-1", "project", "delete", "org-1"));
    assert_eq!(store.loads(), 1);
}

#[tokio::test]
async fn test_periodic_reload_picks_up_external_rows() {
    let store = MemoryPolicyStore::new_shared();
    let lifecycle = EngineLifecycle::new(store.clone());
    let engine = lifecycle.init().await.unwrap();

    store.insert_raw(CasbinRule::from(&PolicyRule::new(
        Role::Viewer,
        Resource::Project,
        Action::Read,
        "p",
    )));
    store.insert_raw(CasbinRule::from(&RoleAssignment::new("u", Role::Viewer, "p")));
    assert!(!engine.enforce_str("u", "project", "read", "p"));

    let handle = lifecycle.spawn_periodic_reload(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.abort();

    assert!(engine.enforce_str("u", "project", "read", "p"));
}

#[tokio::test]
async fn test_staleness_without_reload() {
    let store = MemoryPolicyStore::new_shared();
    let writer = EngineLifecycle::new(store.clone());
    let reader = EngineLifecycle::new(store.clone());

    let reader_engine = reader.init().await.unwrap();
    let writer_engine = writer.init().await.unwrap();

    writer_engine
        .add_policy(PolicyRule::new(Role::Owner, Resource::All, Action::All, "p"))
        .await
        .unwrap();
    writer_engine
        .add_role_for_user_in_domain(RoleAssignment::new("u", Role::Owner, "p"))
        .await
        .unwrap();

    assert!(writer_engine.enforce_str("u", "billing", "read", "p"));
    assert!(!reader_engine.enforce_str("u", "billing", "read", "p"));

    reader_engine.reload_policy().await.unwrap();
    assert!(reader_engine.enforce_str("u", "billing", "read", "p"));
}
