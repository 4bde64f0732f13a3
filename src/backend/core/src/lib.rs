#![allow(clippy::result_large_err)]
//! # Bastion Core
//!
//! Multi-tenant authorization: given a principal, an action on a typed
//! resource and a scoping domain (global, organization or project), decide
//! allow or deny.
//!
//! ## Architecture
//!
//! - **RBAC**: role/resource/action model, the enforcement engine, its
//!   exactly-once lifecycle, policy templates and provisioning cascades
//! - **Context**: per-request principal → user → organization → project resolution
//!   with 401/403/404 guards for axum
//! - **Tokens**: machine credentials bound to a policy type instead of a user
//! - **DB**: PostgreSQL implementations of the policy, token and tenant stores
//! - **Telemetry**: structured logging and metrics

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod rbac;
pub mod telemetry;
pub mod tokens;

pub use error::{AuthzError, ErrorCode, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::{
        ContextLayer, ContextResolver, OrgContext, Principal, ProjectContext, ProjectFromParam,
        RequireOrg, RequireProject, RequireUser, ResolvedContext, TenantDirectory, UserContext,
    };
    pub use crate::db::Database;
    pub use crate::error::{AuthzError, ErrorCode, Result};
    pub use crate::rbac::{
        Action, ApiScope, Domain, EngineLifecycle, EngineState, PolicyDecision, PolicyEngine,
        PolicyManager, PolicyRule, PolicyStore, Resource, Role, RoleAssignment,
        RoleOrPolicyType,
    };
    pub use crate::tokens::{AuthToken, CredentialService, IssuedToken, TokenStore};
}
