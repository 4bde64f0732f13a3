//! Role-based access control with domains.
//!
//! This module provides:
//! - **Models**: roles, resources, actions, domains and the two rule kinds
//! - **Store**: the persisted `p`/`g` row layout and the [`PolicyStore`] trait
//! - **Policy Engine**: the in-memory decision procedure with write-through mutations
//! - **Lifecycle**: exactly-once lazy loading of the process-wide engine
//! - **Templates**: fixed role → grant sets for organizations, projects and API scopes
//! - **Provisioning**: seeding domains, assigning roles, cascading org roles to projects
//!
//! # Usage
//!
//! ```rust,ignore
//! use bastion_core::rbac::{EngineLifecycle, MemoryPolicyStore, PolicyManager, Resource, Action, Role};
//!
//! let lifecycle = EngineLifecycle::new(MemoryPolicyStore::new_shared());
//! let manager = PolicyManager::new(lifecycle.clone());
//!
//! manager.setup_organization_policies("org-1").await?;
//! manager.assign_role_to_user_for_organization("user-1", "org-1", Role::Owner).await?;
//!
//! let engine = lifecycle.init().await?;
//! assert!(engine.enforce_str("user-1", "billing", "read", "org-1"));
//! ```

pub mod lifecycle;
pub mod models;
pub mod policy;
pub mod provisioning;
pub mod roles;
pub mod store;

pub use lifecycle::{EngineLifecycle, EngineState};
pub use models::{
    Action, Domain, ParseError, PolicyRule, Resource, Role, RoleAssignment, RoleOrPolicyType,
    UserId,
};
pub use policy::{PolicyDecision, PolicyEngine};
pub use provisioning::{MigrationReport, PolicyManager};
pub use roles::{ApiScope, DomainKind};
pub use store::{CasbinRule, MemoryPolicyStore, PolicyStore, StoredRule};
