//! The enforcement engine.
//!
//! The engine answers the question:
//! "May subject S perform action A on resource R within domain D?"
//!
//! Rules are loaded once from a [`PolicyStore`] into an in-memory index.
//! `enforce` is a pure in-memory lookup; mutations write through to the store
//! first and touch the index only once the store has accepted the change.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::models::{Action, Domain, PolicyRule, Resource, Role, RoleAssignment, RoleOrPolicyType};
use super::store::{PolicyStore, StoredRule};
use crate::error::{AuthzError, Result};
use crate::telemetry::metrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Allowed through a rule held by the given role or policy type.
    Allow(RoleOrPolicyType),
    /// Denied, with a reason.
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Index
// ═══════════════════════════════════════════════════════════════════════════════

/// Rules and assignments of a single domain.
#[derive(Debug, Default, Clone)]
struct DomainRules {
    /// Grants keyed by the role or policy type holding them.
    grants: HashMap<RoleOrPolicyType, HashSet<(Resource, Action)>>,
    /// Roles held, keyed by user id.
    members: HashMap<String, BTreeSet<RoleOrPolicyType>>,
}

impl DomainRules {
    fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.members.is_empty()
    }
}

/// In-memory mirror of the policy store.
#[derive(Debug, Default, Clone)]
struct PolicyIndex {
    domains: HashMap<Domain, DomainRules>,
}

impl PolicyIndex {
    fn from_rules(rules: impl IntoIterator<Item = StoredRule>) -> Self {
        let mut index = Self::default();
        for rule in rules {
            match rule {
                StoredRule::Policy(rule) => {
                    index.insert_policy(&rule);
                }
                StoredRule::Grouping(assignment) => {
                    index.insert_assignment(&assignment);
                }
            }
        }
        index
    }

    fn contains_policy(&self, rule: &PolicyRule) -> bool {
        self.domains
            .get(&rule.domain)
            .and_then(|d| d.grants.get(&rule.subject))
            .is_some_and(|grants| grants.contains(&(rule.resource, rule.action)))
    }

    fn contains_assignment(&self, assignment: &RoleAssignment) -> bool {
        self.domains
            .get(&assignment.domain)
            .and_then(|d| d.members.get(assignment.user.as_str()))
            .is_some_and(|roles| roles.contains(&assignment.role))
    }

    fn insert_policy(&mut self, rule: &PolicyRule) -> bool {
        self.domains
            .entry(rule.domain.clone())
            .or_default()
            .grants
            .entry(rule.subject.clone())
            .or_default()
            .insert((rule.resource, rule.action))
    }

    fn insert_assignment(&mut self, assignment: &RoleAssignment) -> bool {
        self.domains
            .entry(assignment.domain.clone())
            .or_default()
            .members
            .entry(assignment.user.as_str().to_string())
            .or_default()
            .insert(assignment.role.clone())
    }

    fn remove_policy(&mut self, rule: &PolicyRule) -> bool {
        let Some(domain) = self.domains.get_mut(&rule.domain) else {
            return false;
        };
        let removed = match domain.grants.get_mut(&rule.subject) {
            Some(grants) => {
                let removed = grants.remove(&(rule.resource, rule.action));
                if grants.is_empty() {
                    domain.grants.remove(&rule.subject);
                }
                removed
            }
            None => false,
        };
        if domain.is_empty() {
            self.domains.remove(&rule.domain);
        }
        removed
    }

    fn remove_assignment(&mut self, assignment: &RoleAssignment) -> bool {
        let Some(domain) = self.domains.get_mut(&assignment.domain) else {
            return false;
        };
        let removed = match domain.members.get_mut(assignment.user.as_str()) {
            Some(roles) => {
                let removed = roles.remove(&assignment.role);
                if roles.is_empty() {
                    domain.members.remove(assignment.user.as_str());
                }
                removed
            }
            None => false,
        };
        if domain.is_empty() {
            self.domains.remove(&assignment.domain);
        }
        removed
    }

    /// Roles directly assigned to `user` in `domain`.
    fn roles_of(&self, user: &str, domain: &Domain) -> Option<&BTreeSet<RoleOrPolicyType>> {
        self.domains.get(domain).and_then(|d| d.members.get(user))
    }

    /// Every subject whose grants apply to `subject` in `domain`: the subject
    /// itself, its directly held roles, and `OWNER` when `ADMIN` is held in the
    /// global domain.
    fn effective_subjects(&self, subject: &str, domain: &Domain) -> Vec<RoleOrPolicyType> {
        let mut subjects = vec![RoleOrPolicyType::parse(subject)];
        if let Some(roles) = self.roles_of(subject, domain) {
            subjects.extend(roles.iter().cloned());
        }

        let admin = RoleOrPolicyType::Role(Role::Admin);
        let owner = RoleOrPolicyType::Role(Role::Owner);
        if domain.is_global() && subjects.contains(&admin) && !subjects.contains(&owner) {
            subjects.push(owner);
        }

        subjects
    }

    fn matching_subject(
        &self,
        subject: &str,
        resource: Resource,
        action: Action,
        domain: &Domain,
    ) -> Option<RoleOrPolicyType> {
        let rules = self.domains.get(domain)?;
        self.effective_subjects(subject, domain)
            .into_iter()
            .find(|held| {
                rules.grants.get(held).is_some_and(|grants| {
                    grants
                        .iter()
                        .any(|(r, a)| r.covers(resource) && a.covers(action))
                })
            })
    }

    fn policies(&self) -> impl Iterator<Item = PolicyRule> + '_ {
        self.domains.iter().flat_map(|(domain, rules)| {
            rules.grants.iter().flat_map(move |(subject, grants)| {
                grants.iter().map(move |(resource, action)| {
                    PolicyRule::new(subject.clone(), *resource, *action, domain.clone())
                })
            })
        })
    }

    fn assignments(&self) -> impl Iterator<Item = RoleAssignment> + '_ {
        self.domains.iter().flat_map(|(domain, rules)| {
            rules.members.iter().flat_map(move |(user, roles)| {
                roles
                    .iter()
                    .map(move |role| RoleAssignment::new(user.as_str(), role.clone(), domain.clone()))
            })
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Loaded rule set plus write-through access to its store.
///
/// Thread-safe: decisions take a read lock on the index, mutations are
/// serialized by an async mutex so that persist-then-apply is atomic with
/// respect to other writers in this process.
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    index: RwLock<PolicyIndex>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("PolicyEngine")
            .field("domains", &index.domains.len())
            .finish()
    }
}

impl PolicyEngine {
    /// Load the full rule set from `store`.
    ///
    /// Rows that cannot be decoded are skipped with a warning.
    pub async fn load(store: Arc<dyn PolicyStore>) -> Result<Self> {
        let index = Self::read_index(store.as_ref()).await?;
        Ok(Self {
            store,
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
        })
    }

    async fn read_index(store: &dyn PolicyStore) -> Result<PolicyIndex> {
        let started = Instant::now();
        let rows = match store.load_rules().await {
            Ok(rows) => rows,
            Err(e) => {
                metrics::record_engine_load(false, started.elapsed());
                return Err(e);
            }
        };

        let total = rows.len();
        let decoded: Vec<StoredRule> = rows
            .iter()
            .filter_map(|row| match StoredRule::try_from(row) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(ptype = %row.ptype, v0 = %row.v0, error = %e, "Skipping undecodable policy row");
                    None
                }
            })
            .collect();

        let loaded = decoded.len();
        let index = PolicyIndex::from_rules(decoded);
        let elapsed = started.elapsed();
        metrics::record_engine_load(true, elapsed);
        info!(
            rows = total,
            loaded,
            skipped = total - loaded,
            elapsed_ms = elapsed.as_millis() as u64,
            "Policy rules loaded"
        );

        Ok(index)
    }

    /// The store this engine writes through to.
    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────────

    /// Evaluate a request and report which role or policy type allowed it.
    pub fn check(
        &self,
        subject: &str,
        resource: Resource,
        action: Action,
        domain: &Domain,
    ) -> PolicyDecision {
        let matched = self
            .index
            .read()
            .matching_subject(subject, resource, action, domain);

        metrics::record_decision(matched.is_some());
        match matched {
            Some(held) => {
                debug!(
                    subject,
                    resource = %resource,
                    action = %action,
                    domain = %domain,
                    via = %held,
                    "Permission granted"
                );
                PolicyDecision::Allow(held)
            }
            None => PolicyDecision::Deny(format!(
                "{} may not {} {} in {}",
                subject, action, resource, domain
            )),
        }
    }

    /// Default-deny decision for `(subject, resource, action, domain)`.
    pub fn enforce(&self, subject: &str, resource: Resource, action: Action, domain: &Domain) -> bool {
        self.check(subject, resource, action, domain).is_allowed()
    }

    /// String-level entry point. Unknown resources or actions deny.
    pub fn enforce_str(&self, subject: &str, resource: &str, action: &str, domain: &str) -> bool {
        match (resource.parse::<Resource>(), action.parse::<Action>()) {
            (Ok(resource), Ok(action)) => self.enforce(subject, resource, action, &Domain::from(domain)),
            _ => {
                debug!(subject, resource, action, domain, "Denying unparseable request");
                metrics::record_decision(false);
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Roles and policy types directly assigned to `user` in `domain`.
    pub fn roles_for_user_in_domain(&self, user: &str, domain: &Domain) -> Vec<RoleOrPolicyType> {
        self.index
            .read()
            .roles_of(user, domain)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every assignment scoped to `domain`.
    pub fn assignments_in_domain(&self, domain: &Domain) -> Vec<RoleAssignment> {
        let index = self.index.read();
        let mut assignments: Vec<_> = index
            .assignments()
            .filter(|a| &a.domain == domain)
            .collect();
        assignments.sort();
        assignments
    }

    /// Every role assignment, sorted.
    pub fn grouping_rules(&self) -> Vec<RoleAssignment> {
        let mut assignments: Vec<_> = self.index.read().assignments().collect();
        assignments.sort();
        assignments
    }

    /// Every policy rule, sorted.
    pub fn policy_rules(&self) -> Vec<PolicyRule> {
        let mut rules: Vec<_> = self.index.read().policies().collect();
        rules.sort();
        rules
    }

    /// Every policy rule scoped to `domain`, sorted.
    pub fn policies_in_domain(&self, domain: &Domain) -> Vec<PolicyRule> {
        let mut rules: Vec<_> = self
            .index
            .read()
            .policies()
            .filter(|r| &r.domain == domain)
            .collect();
        rules.sort();
        rules
    }

    pub fn has_policy(&self, rule: &PolicyRule) -> bool {
        self.index.read().contains_policy(rule)
    }

    pub fn has_role_assignment(&self, assignment: &RoleAssignment) -> bool {
        self.index.read().contains_assignment(assignment)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a policy rule. Returns `false` if it already existed.
    pub async fn add_policy(&self, rule: PolicyRule) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.add_policy_locked(&rule).await
    }

    /// Add several policy rules under one writer lock. Returns how many were new.
    ///
    /// Stops at the first store failure; rules persisted before it stay applied.
    pub async fn add_policies(&self, rules: impl IntoIterator<Item = PolicyRule>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut added = 0;
        for rule in rules {
            if self.add_policy_locked(&rule).await? {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn add_policy_locked(&self, rule: &PolicyRule) -> Result<bool> {
        if self.index.read().contains_policy(rule) {
            return Ok(false);
        }
        self.store
            .add_policy(rule)
            .await
            .map_err(|e| AuthzError::mutation("add_policy", e))?;
        self.index.write().insert_policy(rule);
        metrics::record_mutation("add_policy");
        debug!(rule = %rule, "Policy added");
        Ok(true)
    }

    /// Remove a policy rule. Returns `false` if it was not present.
    pub async fn remove_policy(&self, rule: &PolicyRule) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.remove_policy_locked(rule).await
    }

    async fn remove_policy_locked(&self, rule: &PolicyRule) -> Result<bool> {
        if !self.index.read().contains_policy(rule) {
            return Ok(false);
        }
        self.store
            .remove_policy(rule)
            .await
            .map_err(|e| AuthzError::mutation("remove_policy", e))?;
        self.index.write().remove_policy(rule);
        metrics::record_mutation("remove_policy");
        debug!(rule = %rule, "Policy removed");
        Ok(true)
    }

    /// Assign `role` to `user` within `domain`. Returns `false` if already held.
    pub async fn add_role_for_user_in_domain(&self, assignment: RoleAssignment) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.index.read().contains_assignment(&assignment) {
            return Ok(false);
        }
        self.store
            .add_grouping(&assignment)
            .await
            .map_err(|e| AuthzError::mutation("add_role_for_user_in_domain", e))?;
        self.index.write().insert_assignment(&assignment);
        metrics::record_mutation("add_role");
        debug!(assignment = %assignment, "Role assigned");
        Ok(true)
    }

    /// Remove an assignment. Returns `false` if it was not held.
    pub async fn remove_role_for_user_in_domain(&self, assignment: &RoleAssignment) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.remove_assignment_locked(assignment).await
    }

    async fn remove_assignment_locked(&self, assignment: &RoleAssignment) -> Result<bool> {
        if !self.index.read().contains_assignment(assignment) {
            return Ok(false);
        }
        self.store
            .remove_grouping(assignment)
            .await
            .map_err(|e| AuthzError::mutation("remove_role_for_user_in_domain", e))?;
        self.index.write().remove_assignment(assignment);
        metrics::record_mutation("remove_role");
        debug!(assignment = %assignment, "Role revoked");
        Ok(true)
    }

    /// Remove every rule and assignment scoped to `domain`. Returns the number
    /// of rows removed.
    pub async fn remove_domain(&self, domain: &Domain) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let (policies, assignments) = {
            let index = self.index.read();
            let policies: Vec<_> = index.policies().filter(|r| &r.domain == domain).collect();
            let assignments: Vec<_> = index.assignments().filter(|a| &a.domain == domain).collect();
            (policies, assignments)
        };

        let mut removed = 0;
        for rule in &policies {
            if self.remove_policy_locked(rule).await? {
                removed += 1;
            }
        }
        for assignment in &assignments {
            if self.remove_assignment_locked(assignment).await? {
                removed += 1;
            }
        }

        info!(domain = %domain, removed, "Domain rules removed");
        Ok(removed)
    }

    /// Reload every rule from the store and swap the index in one step.
    ///
    /// This is how writes made by other processes become visible.
    pub async fn reload_policy(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let fresh = Self::read_index(self.store.as_ref()).await?;
        *self.index.write() = fresh;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
