//! Process-wide holder of the enforcement engine.
//!
//! The lifecycle is a three-state machine guarded by a mutex:
//!
//! ```text
//! Uninitialized ──init()──▶ Initializing(shared load) ──ok──▶ Ready(engine)
//!       ▲                               │
//!       └────────────── error ──────────┘
//! ```
//!
//! Every caller that arrives while a load is in flight awaits the same shared
//! future, so N concurrent `init()` calls cause exactly one store load. The
//! load itself runs on a spawned task: a caller that drops its `init()` future
//! does not cancel it for the others.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::policy::PolicyEngine;
use super::store::PolicyStore;
use crate::config::EngineConfig;
use crate::error::{AuthzError, ErrorCode, Result};

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<PolicyEngine>>>>;

enum LifecycleState {
    Uninitialized,
    Initializing(SharedLoad),
    Ready(Arc<PolicyEngine>),
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
}

struct Inner {
    store: Arc<dyn PolicyStore>,
    state: Mutex<LifecycleState>,
    loads: AtomicUsize,
}

/// Owns at most one [`PolicyEngine`] and coordinates its lazy loading.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct EngineLifecycle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EngineLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLifecycle")
            .field("state", &self.state())
            .field("loads", &self.load_count())
            .finish()
    }
}

static GLOBAL: OnceLock<EngineLifecycle> = OnceLock::new();

impl EngineLifecycle {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(LifecycleState::Uninitialized),
                loads: AtomicUsize::new(0),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Process-wide instance
    // ─────────────────────────────────────────────────────────────────────────

    /// Install the process-wide lifecycle. Fails if one is already installed.
    pub fn install_global(lifecycle: EngineLifecycle) -> Result<()> {
        GLOBAL.set(lifecycle).map_err(|_| {
            AuthzError::new(
                ErrorCode::ConfigurationError,
                "Policy engine lifecycle is already installed",
            )
        })
    }

    /// The process-wide lifecycle, if installed.
    pub fn global() -> Option<&'static EngineLifecycle> {
        GLOBAL.get()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State machine
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the ready engine, loading it first if needed.
    ///
    /// # Errors
    ///
    /// `InitializationFailed` if the store could not be read. Every caller
    /// waiting on the same attempt receives the same error and the lifecycle
    /// returns to `Uninitialized`, so the next call retries.
    pub async fn init(&self) -> Result<Arc<PolicyEngine>> {
        let load = {
            let mut state = self.inner.state.lock();
            let in_flight = match &*state {
                LifecycleState::Ready(engine) => return Ok(engine.clone()),
                LifecycleState::Initializing(load) => Some(load.clone()),
                LifecycleState::Uninitialized => None,
            };
            in_flight.unwrap_or_else(|| {
                let load = self.start_load();
                *state = LifecycleState::Initializing(load.clone());
                load
            })
        };
        load.await
    }

    fn start_load(&self) -> SharedLoad {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            inner.loads.fetch_add(1, Ordering::SeqCst);
            let result = PolicyEngine::load(inner.store.clone())
                .await
                .map(Arc::new)
                .map_err(AuthzError::into_initialization);

            let mut state = inner.state.lock();
            match &result {
                Ok(engine) => {
                    *state = LifecycleState::Ready(engine.clone());
                    info!("Policy engine ready");
                }
                Err(e) => {
                    *state = LifecycleState::Uninitialized;
                    error!(error = %e, "Policy engine initialization failed");
                }
            }
            result
        });

        let inner = self.inner.clone();
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    // The task never reached its own transition.
                    let mut state = inner.state.lock();
                    if matches!(*state, LifecycleState::Initializing(_)) {
                        *state = LifecycleState::Uninitialized;
                    }
                    Err(AuthzError::initialization(join_error))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// The engine, only if already loaded.
    pub fn engine(&self) -> Option<Arc<PolicyEngine>> {
        match &*self.inner.state.lock() {
            LifecycleState::Ready(engine) => Some(engine.clone()),
            _ => None,
        }
    }

    pub fn state(&self) -> EngineState {
        match &*self.inner.state.lock() {
            LifecycleState::Uninitialized => EngineState::Uninitialized,
            LifecycleState::Initializing(_) => EngineState::Initializing,
            LifecycleState::Ready(_) => EngineState::Ready,
        }
    }

    /// Drop a ready engine so the next `init()` loads afresh.
    ///
    /// Returns `false` if nothing was ready; an in-flight load is left alone.
    pub fn reset(&self) -> bool {
        let mut state = self.inner.state.lock();
        if matches!(*state, LifecycleState::Ready(_)) {
            *state = LifecycleState::Uninitialized;
            true
        } else {
            false
        }
    }

    /// Number of store loads started by `init()`.
    pub fn load_count(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> Arc<dyn PolicyStore> {
        self.inner.store.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Periodic refresh
    // ─────────────────────────────────────────────────────────────────────────

    /// Reload the ready engine every `interval` until the handle is aborted.
    ///
    /// Ticks that find no ready engine are skipped.
    pub fn spawn_periodic_reload(&self, interval: Duration) -> JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = lifecycle.engine() else {
                    continue;
                };
                if let Err(e) = engine.reload_policy().await {
                    warn!(error = %e, "Periodic policy reload failed; keeping previous rules");
                }
            }
        })
    }

    /// Start the periodic refresh if the configuration enables it.
    pub fn spawn_configured_reload(&self, config: &EngineConfig) -> Option<JoinHandle<()>> {
        config.reload_interval().map(|interval| {
            info!(interval_secs = interval.as_secs(), "Periodic policy reload enabled");
            self.spawn_periodic_reload(interval)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::{Action, PolicyRule, Resource, Role, RoleAssignment};
    use crate::rbac::store::MemoryPolicyStore;

    fn seeded() -> EngineLifecycle {
        let store = MemoryPolicyStore::with_rules(
            vec![PolicyRule::new(Role::Owner, Resource::All, Action::All, "org-1")],
            vec![RoleAssignment::new("user-1", Role::Owner, "org-1")],
        );
        EngineLifecycle::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_init_then_ready() {
        let lifecycle = seeded();
        assert_eq!(lifecycle.state(), EngineState::Uninitialized);
        assert!(lifecycle.engine().is_none());

        let engine = lifecycle.init().await.unwrap();
        assert_eq!(lifecycle.state(), EngineState::Ready);
        assert!(engine.enforce_str("user-1", "billing", "read", "org-1"));

        let again = lifecycle.init().await.unwrap();
        assert!(Arc::ptr_eq(&engine, &again));
        assert_eq!(lifecycle.load_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_forces_reload() {
        let lifecycle = seeded();
        lifecycle.init().await.unwrap();

        assert!(lifecycle.reset());
        assert!(!lifecycle.reset());
        assert_eq!(lifecycle.state(), EngineState::Uninitialized);

        lifecycle.init().await.unwrap();
        assert_eq!(lifecycle.load_count(), 2);
    }

    #[tokio::test]
    async fn test_configured_reload_disabled_by_default() {
        let lifecycle = seeded();
        assert!(lifecycle
            .spawn_configured_reload(&EngineConfig::default())
            .is_none());
    }
}
