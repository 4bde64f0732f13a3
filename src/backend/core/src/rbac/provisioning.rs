//! Policy provisioning: seeding templates into new domains, role assignment,
//! and the organization → project cascade.
//!
//! The cascade is one-shot. It runs when a project is created; later changes
//! to organization roles reach existing projects only through
//! [`PolicyManager::migrate_existing_roles`].

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::lifecycle::EngineLifecycle;
use super::models::{Action, Domain, PolicyRule, Resource, Role, RoleAssignment, RoleOrPolicyType, UserId};
use super::policy::PolicyEngine;
use super::roles::{domain_template, DomainKind};
use crate::context::TenantDirectory;
use crate::error::Result;

/// Outcome of a re-cascade pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub projects: usize,
    pub policies_added: usize,
    pub assignments_added: usize,
}

/// Provisioning workflows on top of the lifecycle-managed engine.
#[derive(Debug, Clone)]
pub struct PolicyManager {
    lifecycle: EngineLifecycle,
}

impl PolicyManager {
    pub fn new(lifecycle: EngineLifecycle) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &EngineLifecycle {
        &self.lifecycle
    }

    async fn engine(&self) -> Result<Arc<PolicyEngine>> {
        self.lifecycle.init().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Templates
    // ─────────────────────────────────────────────────────────────────────────

    /// Seed the global domain: `OWNER` holds the wildcard, which `ADMIN`
    /// inherits there.
    pub async fn setup_global_policies(&self) -> Result<usize> {
        let rule = PolicyRule::new(Role::Owner, Resource::All, Action::All, Domain::global());
        self.engine().await?.add_policies([rule]).await
    }

    /// Seed the organization template. Returns the number of new rules.
    pub async fn setup_organization_policies(&self, organization_id: &str) -> Result<usize> {
        self.setup_domain(DomainKind::Organization, organization_id).await
    }

    /// Seed the project template. Returns the number of new rules.
    pub async fn setup_project_policies(&self, project_id: &str) -> Result<usize> {
        self.setup_domain(DomainKind::Project, project_id).await
    }

    async fn setup_domain(&self, kind: DomainKind, id: &str) -> Result<usize> {
        let domain = Domain::parse(id)?;
        let added = self
            .engine()
            .await?
            .add_policies(domain_template(kind, &domain))
            .await?;
        info!(domain = %domain, kind = ?kind, added, "Domain policies provisioned");
        Ok(added)
    }

    pub async fn teardown_organization_policies(&self, organization_id: &str) -> Result<usize> {
        self.engine().await?.remove_domain(&Domain::parse(organization_id)?).await
    }

    pub async fn teardown_project_policies(&self, project_id: &str) -> Result<usize> {
        self.engine().await?.remove_domain(&Domain::parse(project_id)?).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Assignments
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn assign_role_to_user_for_organization(
        &self,
        user_id: &str,
        organization_id: &str,
        role: Role,
    ) -> Result<bool> {
        self.assign(user_id, organization_id, role).await
    }

    pub async fn assign_role_to_user_for_project(
        &self,
        user_id: &str,
        project_id: &str,
        role: Role,
    ) -> Result<bool> {
        self.assign(user_id, project_id, role).await
    }

    async fn assign(&self, user_id: &str, domain_id: &str, role: Role) -> Result<bool> {
        let assignment = RoleAssignment::new(user_id, role, Domain::parse(domain_id)?);
        let added = self
            .engine()
            .await?
            .add_role_for_user_in_domain(assignment)
            .await?;
        if added {
            info!(user_id, domain = domain_id, role = %role, "Role assigned");
        }
        Ok(added)
    }

    pub async fn revoke_role_from_user_for_project(
        &self,
        user_id: &str,
        project_id: &str,
        role: Role,
    ) -> Result<bool> {
        self.revoke(user_id, project_id, role).await
    }

    pub async fn revoke_role_from_user_for_organization(
        &self,
        user_id: &str,
        organization_id: &str,
        role: Role,
    ) -> Result<bool> {
        self.revoke(user_id, organization_id, role).await
    }

    async fn revoke(&self, user_id: &str, domain_id: &str, role: Role) -> Result<bool> {
        let assignment = RoleAssignment::new(user_id, role, Domain::parse(domain_id)?);
        let removed = self
            .engine()
            .await?
            .remove_role_for_user_in_domain(&assignment)
            .await?;
        if removed {
            info!(user_id, domain = domain_id, role = %role, "Role revoked");
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// True iff the user holds a role in the project ranking at least `minimum`.
    ///
    /// A pure rank comparison over assignments; no rule is consulted.
    pub async fn has_role_for_project(&self, user_id: &str, project_id: &str, minimum: Role) -> Result<bool> {
        self.has_role(user_id, project_id, minimum).await
    }

    pub async fn has_role_for_organization(
        &self,
        user_id: &str,
        organization_id: &str,
        minimum: Role,
    ) -> Result<bool> {
        self.has_role(user_id, organization_id, minimum).await
    }

    async fn has_role(&self, user_id: &str, domain_id: &str, minimum: Role) -> Result<bool> {
        let roles = self
            .engine()
            .await?
            .roles_for_user_in_domain(user_id, &Domain::new(domain_id));
        Ok(roles
            .iter()
            .filter_map(RoleOrPolicyType::as_role)
            .any(|role| role.satisfies(minimum)))
    }

    pub async fn can_user_access_in_project(
        &self,
        user_id: &str,
        resource: Resource,
        action: Action,
        project_id: &str,
    ) -> Result<bool> {
        Ok(self
            .engine()
            .await?
            .enforce(user_id, resource, action, &Domain::new(project_id)))
    }

    pub async fn can_user_access_in_organization(
        &self,
        user_id: &str,
        resource: Resource,
        action: Action,
        organization_id: &str,
    ) -> Result<bool> {
        Ok(self
            .engine()
            .await?
            .enforce(user_id, resource, action, &Domain::new(organization_id)))
    }

    pub async fn get_user_roles_for_project(&self, user_id: &str, project_id: &str) -> Result<Vec<RoleOrPolicyType>> {
        Ok(self
            .engine()
            .await?
            .roles_for_user_in_domain(user_id, &Domain::new(project_id)))
    }

    pub async fn get_user_roles_for_organization(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Vec<RoleOrPolicyType>> {
        Ok(self
            .engine()
            .await?
            .roles_for_user_in_domain(user_id, &Domain::new(organization_id)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cascade
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy every assignment of the organization into the project's domain.
    /// Returns the number of new assignments.
    pub async fn cascade_organization_roles(&self, organization_id: &str, project_id: &str) -> Result<usize> {
        let organization = Domain::parse(organization_id)?;
        let project = Domain::parse(project_id)?;
        let engine = self.engine().await?;

        let mut added = 0;
        for assignment in engine.assignments_in_domain(&organization) {
            let derived = RoleAssignment {
                user: assignment.user,
                role: assignment.role,
                domain: project.clone(),
            };
            if engine.add_role_for_user_in_domain(derived).await? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Provision a freshly created project and cascade its organization's roles.
    pub async fn on_project_created(&self, organization_id: &str, project_id: &str) -> Result<usize> {
        self.setup_project_policies(project_id).await?;
        let cascaded = self
            .cascade_organization_roles(organization_id, project_id)
            .await?;
        info!(
            organization_id,
            project_id, cascaded, "Project provisioned with cascaded roles"
        );
        Ok(cascaded)
    }

    /// Re-derive every project's assignments from its organization's.
    ///
    /// Only adds; assignments no longer backed by the organization are kept.
    pub async fn migrate_existing_roles(&self, directory: &dyn TenantDirectory) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for project in directory.projects().await? {
            report.policies_added += self.setup_project_policies(&project.id).await?;
            report.assignments_added += self
                .cascade_organization_roles(&project.organization_id, &project.id)
                .await?;
            report.projects += 1;
        }
        info!(
            projects = report.projects,
            policies_added = report.policies_added,
            assignments_added = report.assignments_added,
            "Role migration finished"
        );
        Ok(report)
    }

    /// Every role the user holds per domain, across the given domains.
    pub async fn roles_by_domain(&self, user_id: &str, domains: &[Domain]) -> Result<Vec<RoleAssignment>> {
        let engine = self.engine().await?;
        let user = UserId::new(user_id);
        Ok(domains
            .iter()
            .flat_map(|domain| {
                engine
                    .roles_for_user_in_domain(user_id, domain)
                    .into_iter()
                    .map(|role| RoleAssignment {
                        user: user.clone(),
                        role,
                        domain: domain.clone(),
                    })
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::store::MemoryPolicyStore;

    fn manager() -> PolicyManager {
        PolicyManager::new(EngineLifecycle::new(MemoryPolicyStore::new_shared()))
    }

    #[tokio::test]
    async fn test_has_role_is_rank_comparison() {
        let manager = manager();
        manager
            .assign_role_to_user_for_project("u", "p", Role::Member)
            .await
            .unwrap();

        assert!(manager.has_role_for_project("u", "p", Role::Viewer).await.unwrap());
        assert!(manager.has_role_for_project("u", "p", Role::Member).await.unwrap());
        assert!(!manager.has_role_for_project("u", "p", Role::Admin).await.unwrap());
        // No rules were provisioned; the rank check does not need any.
        assert!(!manager
            .can_user_access_in_project("u", Resource::Project, Action::Read, "p")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let manager = manager();
        let first = manager.setup_project_policies("p").await.unwrap();
        assert!(first > 0);
        assert_eq!(manager.setup_project_policies("p").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_domain_rejected() {
        let manager = manager();
        assert!(manager.setup_project_policies("").await.is_err());
        assert!(manager
            .assign_role_to_user_for_project("u", " ", Role::Owner)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_roles_by_domain() {
        let manager = manager();
        manager
            .assign_role_to_user_for_organization("u", "org", Role::Admin)
            .await
            .unwrap();
        manager
            .assign_role_to_user_for_project("u", "p", Role::Viewer)
            .await
            .unwrap();

        let roles = manager
            .roles_by_domain("u", &[Domain::new("org"), Domain::new("p"), Domain::new("q")])
            .await
            .unwrap();
        assert_eq!(roles.len(), 2);
    }
}
