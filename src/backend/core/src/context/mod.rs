//! Context resolution: who is calling, in which organization and project.
//!
//! ```text
//! Principal ──▶ UserRecord ──▶ primary organization ──▶ first project
//!                                                         ▲
//!                            :project_id route param ─────┘ (override)
//! ```

pub mod directory;
pub mod middleware;
pub mod resolver;

pub use directory::{
    Membership, MemoryTenantDirectory, OrganizationRecord, ProjectRecord, TenantDirectory,
    UserRecord,
};
pub use middleware::{
    ContextLayer, ContextService, Principal, ProjectFromParam, RequireOrg, RequireProject,
    RequireUser, PROJECT_PARAM,
};
pub use resolver::{ContextResolver, OrgContext, ProjectContext, ResolvedContext, UserContext};
