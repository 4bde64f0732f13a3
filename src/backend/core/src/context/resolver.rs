//! Per-request resolution of principal → user → organization → project.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::directory::{Membership, ProjectRecord, TenantDirectory, UserRecord};
use crate::error::{AuthzError, Result};
use crate::rbac::models::{Domain, Role};

// ═══════════════════════════════════════════════════════════════════════════════
// Context Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: String,
    pub principal_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl From<UserRecord> for UserContext {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            principal_id: user.principal_id,
            email: user.email,
            name: user.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgContext {
    pub id: String,
    pub name: String,
    /// The user's membership role in this organization.
    pub role: Role,
}

impl OrgContext {
    pub fn domain(&self) -> Domain {
        Domain::new(self.id.as_str())
    }
}

impl From<Membership> for OrgContext {
    fn from(membership: Membership) -> Self {
        Self {
            id: membership.organization.id,
            name: membership.organization.name,
            role: membership.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub id: String,
    pub organization_id: String,
    pub name: String,
}

impl ProjectContext {
    pub fn domain(&self) -> Domain {
        Domain::new(self.id.as_str())
    }
}

impl From<ProjectRecord> for ProjectContext {
    fn from(project: ProjectRecord) -> Self {
        Self {
            id: project.id,
            organization_id: project.organization_id,
            name: project.name,
        }
    }
}

/// Request-scoped projection of who is calling and where. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContext {
    pub user: Option<UserContext>,
    pub organization: Option<OrgContext>,
    pub project: Option<ProjectContext>,
}

impl ResolvedContext {
    pub fn empty() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Guards
    // ─────────────────────────────────────────────────────────────────────────

    /// 401 when no user was resolved.
    pub fn require_user_context(&self) -> Result<&UserContext> {
        self.user
            .as_ref()
            .ok_or_else(|| AuthzError::unauthorized("Authentication required"))
    }

    /// 404 when no organization was resolved.
    pub fn require_org_context(&self) -> Result<&OrgContext> {
        self.organization
            .as_ref()
            .ok_or_else(|| AuthzError::organization_not_found("current context"))
    }

    /// 404 when no project was resolved.
    pub fn require_project_context(&self) -> Result<&ProjectContext> {
        self.project
            .as_ref()
            .ok_or_else(|| AuthzError::project_not_found("current context"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds [`ResolvedContext`] values from a [`TenantDirectory`].
#[derive(Clone)]
pub struct ContextResolver {
    directory: Arc<dyn TenantDirectory>,
}

impl ContextResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    /// Resolve the context for an optional principal.
    ///
    /// Missing pieces leave the corresponding fields empty; only directory
    /// failures are errors.
    pub async fn resolve(&self, principal_id: Option<&str>) -> Result<ResolvedContext> {
        let Some(principal_id) = principal_id else {
            return Ok(ResolvedContext::empty());
        };

        let Some(user) = self.directory.user_by_principal(principal_id).await? else {
            debug!(principal_id, "No local user for principal");
            return Ok(ResolvedContext::empty());
        };

        let organization = self.primary_organization(&user.id).await?;
        let project = match &organization {
            Some(org) => self
                .directory
                .first_project(&org.id)
                .await?
                .map(ProjectContext::from),
            None => None,
        };

        Ok(ResolvedContext {
            user: Some(user.into()),
            organization,
            project,
        })
    }

    /// The organization the user owns, or failing that any membership.
    pub async fn primary_organization(&self, user_id: &str) -> Result<Option<OrgContext>> {
        let memberships = self.directory.memberships(user_id).await?;
        let owned = memberships.iter().position(|m| m.role == Role::Owner);
        Ok(match owned {
            Some(index) => memberships.into_iter().nth(index),
            None => memberships.into_iter().next(),
        }
        .map(OrgContext::from))
    }

    /// Replace the default project with the one named by a route parameter.
    ///
    /// Access is checked before the project is fetched, so a caller outside
    /// the owning organization cannot tell a missing project from a foreign one.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` (401) when the context has no user
    /// - `Forbidden` (403) when the project is unknown or the user is not a
    ///   member of its organization
    /// - `ProjectNotFound` (404) when access was granted but the project is gone
    pub async fn set_project_context_from_param(
        &self,
        context: &mut ResolvedContext,
        project_id: &str,
    ) -> Result<()> {
        let user_id = context.require_user_context()?.id.clone();

        if self
            .directory
            .project_access(&user_id, project_id)
            .await?
            .is_none()
        {
            debug!(user_id = %user_id, project_id, "Project access denied");
            return Err(AuthzError::forbidden("You do not have access to this project"));
        }

        let project = self
            .directory
            .project(project_id)
            .await?
            .ok_or_else(|| AuthzError::project_not_found(project_id))?;

        if context.organization.is_none() {
            context.organization = self.primary_organization(&user_id).await?;
        }
        context.project = Some(project.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::directory::MemoryTenantDirectory;
    use crate::error::ErrorCode;

    fn directory() -> Arc<MemoryTenantDirectory> {
        let dir = MemoryTenantDirectory::new_shared();
        dir.add_user("user-1", "auth|1");
        dir.add_user("user-2", "auth|2");
        dir.add_organization("org-a", "Alpha");
        dir.add_organization("org-b", "Beta");
        dir.add_membership("user-1", "org-a", Role::Member);
        dir.add_membership("user-1", "org-b", Role::Owner);
        dir.add_project("proj-b1", "org-b", "Beta One");
        dir.add_project("proj-a1", "org-a", "Alpha One");
        dir
    }

    #[tokio::test]
    async fn test_no_principal_resolves_empty() {
        let resolver = ContextResolver::new(directory());
        assert_eq!(resolver.resolve(None).await.unwrap(), ResolvedContext::empty());
        assert_eq!(
            resolver.resolve(Some("auth|unknown")).await.unwrap(),
            ResolvedContext::empty()
        );
    }

    #[tokio::test]
    async fn test_primary_org_prefers_owner() {
        let resolver = ContextResolver::new(directory());
        let ctx = resolver.resolve(Some("auth|1")).await.unwrap();

        assert_eq!(ctx.user.as_ref().unwrap().id, "user-1");
        let org = ctx.require_org_context().unwrap();
        assert_eq!(org.id, "org-b");
        assert_eq!(org.role, Role::Owner);
        assert_eq!(ctx.require_project_context().unwrap().id, "proj-b1");
    }

    #[tokio::test]
    async fn test_user_without_membership() {
        let resolver = ContextResolver::new(directory());
        let ctx = resolver.resolve(Some("auth|2")).await.unwrap();

        assert!(ctx.require_user_context().is_ok());
        assert_eq!(
            ctx.require_org_context().unwrap_err().code(),
            ErrorCode::OrganizationNotFound
        );
        assert_eq!(
            ctx.require_project_context().unwrap_err().code(),
            ErrorCode::ProjectNotFound
        );
    }

    #[tokio::test]
    async fn test_project_param_outcomes() {
        let resolver = ContextResolver::new(directory());

        let mut anonymous = ResolvedContext::empty();
        let err = resolver
            .set_project_context_from_param(&mut anonymous, "proj-a1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);

        let mut ctx = resolver.resolve(Some("auth|1")).await.unwrap();
        let err = resolver
            .set_project_context_from_param(&mut ctx, "proj-missing")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        resolver
            .set_project_context_from_param(&mut ctx, "proj-a1")
            .await
            .unwrap();
        assert_eq!(ctx.project.as_ref().unwrap().id, "proj-a1");

        let mut outsider = resolver.resolve(Some("auth|2")).await.unwrap();
        let err = resolver
            .set_project_context_from_param(&mut outsider, "proj-a1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn test_missing_and_foreign_projects_are_indistinguishable() {
        let resolver = ContextResolver::new(directory());
        let mut ctx = resolver.resolve(Some("auth|2")).await.unwrap();

        let foreign = resolver
            .set_project_context_from_param(&mut ctx, "proj-a1")
            .await
            .unwrap_err();
        let missing = resolver
            .set_project_context_from_param(&mut ctx, "proj-nope")
            .await
            .unwrap_err();

        assert_eq!(foreign.code(), missing.code());
        assert_eq!(foreign.user_message(), missing.user_message());
        assert!(ctx.project.is_none());
    }

    /// Grants access through the wrapped directory but has lost every project row.
    struct DeletedProjects(Arc<MemoryTenantDirectory>);

    #[async_trait::async_trait]
    impl TenantDirectory for DeletedProjects {
        async fn user_by_principal(&self, principal_id: &str) -> Result<Option<UserRecord>> {
            self.0.user_by_principal(principal_id).await
        }

        async fn memberships(&self, user_id: &str) -> Result<Vec<Membership>> {
            self.0.memberships(user_id).await
        }

        async fn first_project(&self, _organization_id: &str) -> Result<Option<ProjectRecord>> {
            Ok(None)
        }

        async fn project(&self, _project_id: &str) -> Result<Option<ProjectRecord>> {
            Ok(None)
        }

        async fn membership_role(&self, user_id: &str, organization_id: &str) -> Result<Option<Role>> {
            self.0.membership_role(user_id, organization_id).await
        }

        async fn project_access(&self, user_id: &str, project_id: &str) -> Result<Option<Role>> {
            self.0.project_access(user_id, project_id).await
        }

        async fn projects(&self) -> Result<Vec<ProjectRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_not_found_only_after_access_is_granted() {
        let resolver = ContextResolver::new(Arc::new(DeletedProjects(directory())));
        let mut ctx = resolver.resolve(Some("auth|1")).await.unwrap();

        let err = resolver
            .set_project_context_from_param(&mut ctx, "proj-a1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProjectNotFound);
    }
}
