//! Tenant directory: the relational lookups context resolution depends on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::rbac::models::Role;

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// A local user row, keyed by the external identity provider's principal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub principal_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub id: String,
    pub name: String,
}

/// A user's membership in one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub organization: OrganizationRecord,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Directory Trait
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait TenantDirectory: Send + Sync + 'static {
    async fn user_by_principal(&self, principal_id: &str) -> Result<Option<UserRecord>>;

    /// Every organization the user belongs to, in a stable but unspecified order.
    async fn memberships(&self, user_id: &str) -> Result<Vec<Membership>>;

    /// The oldest project of an organization.
    async fn first_project(&self, organization_id: &str) -> Result<Option<ProjectRecord>>;

    async fn project(&self, project_id: &str) -> Result<Option<ProjectRecord>>;

    async fn membership_role(&self, user_id: &str, organization_id: &str) -> Result<Option<Role>>;

    /// The user's role in the organization owning `project_id`. `None` both
    /// when the project is unknown and when the user is not a member.
    async fn project_access(&self, user_id: &str, project_id: &str) -> Result<Option<Role>>;

    /// Every project, oldest first.
    async fn projects(&self) -> Result<Vec<ProjectRecord>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory Directory
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory directory for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryTenantDirectory {
    users_by_principal: DashMap<String, UserRecord>,
    organizations: DashMap<String, OrganizationRecord>,
    memberships: DashMap<String, Vec<(String, Role)>>,
    projects: DashMap<String, ProjectRecord>,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn add_user(&self, id: &str, principal_id: &str) -> UserRecord {
        let user = UserRecord {
            id: id.to_string(),
            principal_id: principal_id.to_string(),
            email: None,
            name: None,
        };
        self.users_by_principal
            .insert(principal_id.to_string(), user.clone());
        user
    }

    pub fn add_organization(&self, id: &str, name: &str) -> OrganizationRecord {
        let org = OrganizationRecord {
            id: id.to_string(),
            name: name.to_string(),
        };
        self.organizations.insert(id.to_string(), org.clone());
        org
    }

    /// Add or replace a user's membership role in an organization.
    pub fn add_membership(&self, user_id: &str, organization_id: &str, role: Role) {
        let mut entry = self.memberships.entry(user_id.to_string()).or_default();
        match entry.iter_mut().find(|(org, _)| org == organization_id) {
            Some(existing) => existing.1 = role,
            None => entry.push((organization_id.to_string(), role)),
        }
    }

    /// Add a project. Projects added later count as newer.
    pub fn add_project(&self, id: &str, organization_id: &str, name: &str) -> ProjectRecord {
        let created_at = self
            .projects
            .iter()
            .map(|p| p.created_at)
            .max()
            .map(|latest| latest.max(Utc::now()) + chrono::Duration::microseconds(1))
            .unwrap_or_else(Utc::now);

        let project = ProjectRecord {
            id: id.to_string(),
            organization_id: organization_id.to_string(),
            name: name.to_string(),
            created_at,
        };
        self.projects.insert(id.to_string(), project.clone());
        project
    }

    fn sorted_projects(&self, filter: impl Fn(&ProjectRecord) -> bool) -> Vec<ProjectRecord> {
        let mut projects: Vec<_> = self
            .projects
            .iter()
            .filter(|p| filter(p.value()))
            .map(|p| p.value().clone())
            .collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        projects
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn user_by_principal(&self, principal_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users_by_principal.get(principal_id).map(|u| u.clone()))
    }

    async fn memberships(&self, user_id: &str) -> Result<Vec<Membership>> {
        let Some(entries) = self.memberships.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .filter_map(|(org_id, role)| {
                self.organizations.get(org_id).map(|org| Membership {
                    organization: org.clone(),
                    role: *role,
                })
            })
            .collect())
    }

    async fn first_project(&self, organization_id: &str) -> Result<Option<ProjectRecord>> {
        Ok(self
            .sorted_projects(|p| p.organization_id == organization_id)
            .into_iter()
            .next())
    }

    async fn project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        Ok(self.projects.get(project_id).map(|p| p.clone()))
    }

    async fn membership_role(&self, user_id: &str, organization_id: &str) -> Result<Option<Role>> {
        Ok(self.memberships.get(user_id).and_then(|entries| {
            entries
                .iter()
                .find(|(org, _)| org == organization_id)
                .map(|(_, role)| *role)
        }))
    }

    async fn project_access(&self, user_id: &str, project_id: &str) -> Result<Option<Role>> {
        let Some(organization_id) = self
            .projects
            .get(project_id)
            .map(|p| p.organization_id.clone())
        else {
            return Ok(None);
        };
        self.membership_role(user_id, &organization_id).await
    }

    async fn projects(&self) -> Result<Vec<ProjectRecord>> {
        Ok(self.sorted_projects(|_| true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_project_is_oldest() {
        let dir = MemoryTenantDirectory::new();
        dir.add_organization("org-1", "Acme");
        dir.add_project("proj-b", "org-1", "B");
        dir.add_project("proj-a", "org-1", "A");
        dir.add_project("proj-x", "org-2", "X");

        let first = dir.first_project("org-1").await.unwrap().unwrap();
        assert_eq!(first.id, "proj-b");
        assert_eq!(dir.projects().await.unwrap().len(), 3);
        assert!(dir.first_project("org-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_membership_role_replaced() {
        let dir = MemoryTenantDirectory::new();
        dir.add_organization("org-1", "Acme");
        dir.add_membership("user-1", "org-1", Role::Member);
        dir.add_membership("user-1", "org-1", Role::Admin);

        assert_eq!(
            dir.membership_role("user-1", "org-1").await.unwrap(),
            Some(Role::Admin)
        );
        assert_eq!(dir.memberships("user-1").await.unwrap().len(), 1);
        assert_eq!(dir.membership_role("user-2", "org-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_project_access_hides_missing_projects() {
        let dir = MemoryTenantDirectory::new();
        dir.add_organization("org-1", "Acme");
        dir.add_membership("user-1", "org-1", Role::Viewer);
        dir.add_project("proj-1", "org-1", "One");

        assert_eq!(
            dir.project_access("user-1", "proj-1").await.unwrap(),
            Some(Role::Viewer)
        );
        assert_eq!(dir.project_access("user-2", "proj-1").await.unwrap(), None);
        assert_eq!(dir.project_access("user-1", "proj-missing").await.unwrap(), None);
    }
}
