//! Provisioning templates, role assignment and the org → project cascade.

use std::sync::Arc;

use bastion_core::context::MemoryTenantDirectory;
use bastion_core::rbac::{
    Action, Domain, EngineLifecycle, MemoryPolicyStore, PolicyManager, Resource, Role,
    RoleOrPolicyType,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn manager() -> (Arc<MemoryPolicyStore>, PolicyManager) {
    let store = MemoryPolicyStore::new_shared();
    let manager = PolicyManager::new(EngineLifecycle::new(store.clone()));
    (store, manager)
}

async fn can(manager: &PolicyManager, user: &str, resource: Resource, action: Action, project: &str) -> bool {
    manager
        .can_user_access_in_project(user, resource, action, project)
        .await
        .unwrap()
}

// ============================================================================
// Templates
// ============================================================================

#[tokio::test]
async fn test_organization_template_decisions() {
    let (_, manager) = manager();
    manager.setup_organization_policies("org-1").await.unwrap();
    manager
        .assign_role_to_user_for_organization("admin", "org-1", Role::Admin)
        .await
        .unwrap();
    manager
        .assign_role_to_user_for_organization("member", "org-1", Role::Member)
        .await
        .unwrap();

    let check = |user: &'static str, resource: Resource, action: Action| {
        let manager = manager.clone();
        async move {
            manager
                .can_user_access_in_organization(user, resource, action, "org-1")
                .await
                .unwrap()
        }
    };

    assert!(check("admin", Resource::Project, Action::Delete).await);
    assert!(check("admin", Resource::Billing, Action::Read).await);
    assert!(!check("admin", Resource::Billing, Action::Update).await);
    assert!(check("admin", Resource::Policy, Action::Manage).await);
    assert!(check("member", Resource::Organization, Action::Read).await);
    assert!(!check("member", Resource::Project, Action::Read).await);
}

#[tokio::test]
async fn test_project_template_decisions() {
    let (_, manager) = manager();
    manager.setup_project_policies("p").await.unwrap();
    for (user, role) in [
        ("owner", Role::Owner),
        ("admin", Role::Admin),
        ("member", Role::Member),
        ("viewer", Role::Viewer),
    ] {
        manager
            .assign_role_to_user_for_project(user, "p", role)
            .await
            .unwrap();
    }

    assert!(can(&manager, "owner", Resource::Billing, Action::Delete, "p").await);

    assert!(can(&manager, "admin", Resource::Customer, Action::Delete, "p").await);
    assert!(can(&manager, "admin", Resource::AuthToken, Action::Manage, "p").await);
    assert!(!can(&manager, "admin", Resource::Project, Action::Delete, "p").await);

    assert!(can(&manager, "member", Resource::Campaign, Action::Update, "p").await);
    assert!(!can(&manager, "member", Resource::Campaign, Action::Delete, "p").await);
    assert!(can(&manager, "member", Resource::ApiToken, Action::Read, "p").await);

    assert!(can(&manager, "viewer", Resource::Membership, Action::Read, "p").await);
    assert!(!can(&manager, "viewer", Resource::ApiToken, Action::Read, "p").await);
    assert!(!can(&manager, "viewer", Resource::Reward, Action::Create, "p").await);
}

#[tokio::test]
async fn test_setup_twice_changes_nothing() {
    let (store, manager) = manager();
    manager.setup_project_policies("p").await.unwrap();
    let rows = store.len();
    let engine = manager.lifecycle().init().await.unwrap();
    let before = engine.policies_in_domain(&Domain::new("p"));

    assert_eq!(manager.setup_project_policies("p").await.unwrap(), 0);
    assert_eq!(store.len(), rows);
    assert_eq!(engine.policies_in_domain(&Domain::new("p")), before);
}

// ============================================================================
// Roles
// ============================================================================

#[tokio::test]
async fn test_role_rank_monotonicity() {
    let (_, manager) = manager();
    manager
        .assign_role_to_user_for_project("u", "p", Role::Admin)
        .await
        .unwrap();

    let mut previous = true;
    for role in Role::all() {
        let held = manager.has_role_for_project("u", "p", role).await.unwrap();
        // Once false for a lower role it can never be true for a higher one.
        assert!(previous || !held);
        previous = held;
    }
    assert!(manager.has_role_for_project("u", "p", Role::Admin).await.unwrap());
    assert!(!manager.has_role_for_project("u", "p", Role::Owner).await.unwrap());
    assert!(!manager.has_role_for_project("u", "other", Role::Viewer).await.unwrap());
}

#[tokio::test]
async fn test_revoke_role() {
    let (_, manager) = manager();
    manager.setup_project_policies("p").await.unwrap();
    manager
        .assign_role_to_user_for_project("u", "p", Role::Member)
        .await
        .unwrap();
    assert!(can(&manager, "u", Resource::Project, Action::Read, "p").await);

    assert!(manager
        .revoke_role_from_user_for_project("u", "p", Role::Member)
        .await
        .unwrap());
    assert!(!manager
        .revoke_role_from_user_for_project("u", "p", Role::Member)
        .await
        .unwrap());
    assert!(!can(&manager, "u", Resource::Project, Action::Read, "p").await);
    assert!(manager.get_user_roles_for_project("u", "p").await.unwrap().is_empty());
}

// ============================================================================
// Cascade
// ============================================================================

#[tokio::test]
async fn test_project_creation_cascades_org_roles_once() {
    let (_, manager) = manager();
    manager.setup_organization_policies("org").await.unwrap();
    manager
        .assign_role_to_user_for_organization("alice", "org", Role::Owner)
        .await
        .unwrap();
    manager
        .assign_role_to_user_for_organization("bob", "org", Role::Viewer)
        .await
        .unwrap();

    assert_eq!(manager.on_project_created("org", "p1").await.unwrap(), 2);
    assert!(can(&manager, "alice", Resource::Billing, Action::Delete, "p1").await);
    assert!(can(&manager, "bob", Resource::Campaign, Action::Read, "p1").await);
    assert_eq!(
        manager.get_user_roles_for_project("bob", "p1").await.unwrap(),
        vec![RoleOrPolicyType::Role(Role::Viewer)]
    );

    // A later org-level change does not reach the existing project.
    manager
        .assign_role_to_user_for_organization("carol", "org", Role::Member)
        .await
        .unwrap();
    assert!(!can(&manager, "carol", Resource::Project, Action::Read, "p1").await);
}

#[tokio::test]
async fn test_migrate_existing_roles_resyncs() {
    let (_, manager) = manager();
    let directory = MemoryTenantDirectory::new();
    directory.add_organization("org", "Org");
    directory.add_project("p1", "org", "One");
    directory.add_project("p2", "org", "Two");

    manager.on_project_created("org", "p1").await.unwrap();
    manager
        .assign_role_to_user_for_organization("carol", "org", Role::Member)
        .await
        .unwrap();

    let report = manager.migrate_existing_roles(&directory).await.unwrap();
    assert_eq!(report.projects, 2);
    assert_eq!(report.assignments_added, 2);
    assert!(report.policies_added > 0);

    assert!(can(&manager, "carol", Resource::Project, Action::Read, "p1").await);
    assert!(can(&manager, "carol", Resource::Project, Action::Read, "p2").await);

    let again = manager.migrate_existing_roles(&directory).await.unwrap();
    assert_eq!(again.assignments_added, 0);
    assert_eq!(again.policies_added, 0);
}

#[tokio::test]
async fn test_teardown_removes_domain() {
    let (store, manager) = manager();
    manager.setup_project_policies("p").await.unwrap();
    manager.setup_organization_policies("org").await.unwrap();
    manager
        .assign_role_to_user_for_project("u", "p", Role::Owner)
        .await
        .unwrap();
    let org_rows = manager
        .lifecycle()
        .init()
        .await
        .unwrap()
        .policies_in_domain(&Domain::new("org"))
        .len();

    manager.teardown_project_policies("p").await.unwrap();
    assert!(!can(&manager, "u", Resource::Project, Action::Read, "p").await);
    assert_eq!(store.len(), org_rows);
}

#[tokio::test]
async fn test_global_admin_inherits_owner_after_setup() {
    let (_, manager) = manager();
    manager.setup_global_policies().await.unwrap();
    manager
        .lifecycle()
        .init()
        .await
        .unwrap()
        .add_role_for_user_in_domain(bastion_core::rbac::RoleAssignment::new(
            "root",
            Role::Admin,
            Domain::GLOBAL,
        ))
        .await
        .unwrap();

    let engine = manager.lifecycle().init().await.unwrap();
    assert!(engine.enforce_str("root", "organization", "delete", "global"));
}
