//! Fixed role → grant templates.
//!
//! Organization domain:
//!
//! | Role   | Grants                                                           |
//! |--------|------------------------------------------------------------------|
//! | OWNER  | `*` on `*`                                                       |
//! | ADMIN  | all on project, user; read billing, organization; manage policy  |
//! | MEMBER | read organization                                                |
//! | VIEWER | read organization                                                |
//!
//! Project domain:
//!
//! | Role   | Grants                                                                 |
//! |--------|------------------------------------------------------------------------|
//! | OWNER  | `*` on `*`                                                             |
//! | ADMIN  | update project; manage user, auth_token; CRUD customer, reward,        |
//! |        | campaign, membership; all on api_token                                 |
//! | MEMBER | read project; create/read/update customer, reward, campaign;           |
//! |        | read membership, api_token, auth_token                                 |
//! | VIEWER | read project, customer, reward, campaign, membership                   |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::models::{Action, Domain, ParseError, PolicyRule, Resource, Role, RoleOrPolicyType};

/// A `(resource, action)` pair granted by a template.
pub type Grant = (Resource, Action);

const OPERATIONAL: [Resource; 3] = [Resource::Customer, Resource::Reward, Resource::Campaign];

/// Which kind of domain a template applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    Organization,
    Project,
}

/// Grants held by `role` in a domain of the given kind.
pub fn grants_for(kind: DomainKind, role: Role) -> Vec<Grant> {
    match kind {
        DomainKind::Organization => organization_grants(role),
        DomainKind::Project => project_grants(role),
    }
}

fn organization_grants(role: Role) -> Vec<Grant> {
    match role {
        Role::Owner => vec![(Resource::All, Action::All)],
        Role::Admin => vec![
            (Resource::Project, Action::All),
            (Resource::User, Action::All),
            (Resource::Billing, Action::Read),
            (Resource::Organization, Action::Read),
            (Resource::Policy, Action::Manage),
        ],
        Role::Member | Role::Viewer => vec![(Resource::Organization, Action::Read)],
    }
}

fn project_grants(role: Role) -> Vec<Grant> {
    match role {
        Role::Owner => vec![(Resource::All, Action::All)],
        Role::Admin => {
            let mut grants = vec![
                (Resource::Project, Action::Update),
                (Resource::User, Action::Manage),
            ];
            for resource in OPERATIONAL.into_iter().chain([Resource::Membership]) {
                grants.extend(Action::crud().map(|action| (resource, action)));
            }
            grants.push((Resource::ApiToken, Action::All));
            grants.push((Resource::AuthToken, Action::Manage));
            grants
        }
        Role::Member => {
            let mut grants = vec![(Resource::Project, Action::Read)];
            for resource in OPERATIONAL {
                grants.extend([Action::Create, Action::Read, Action::Update].map(|a| (resource, a)));
            }
            grants.extend(
                [Resource::Membership, Resource::ApiToken, Resource::AuthToken]
                    .map(|r| (r, Action::Read)),
            );
            grants
        }
        Role::Viewer => OPERATIONAL
            .into_iter()
            .chain([Resource::Project, Resource::Membership])
            .map(|r| (r, Action::Read))
            .collect(),
    }
}

/// Every policy rule a domain of `kind` receives at provisioning time.
pub fn domain_template(kind: DomainKind, domain: &Domain) -> Vec<PolicyRule> {
    Role::all()
        .into_iter()
        .flat_map(|role| {
            grants_for(kind, role)
                .into_iter()
                .map(move |(resource, action)| PolicyRule::new(role, resource, action, domain.clone()))
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// API token scopes
// ═══════════════════════════════════════════════════════════════════════════════

/// Scope of a machine API token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiScope {
    Read,
    Write,
    Admin,
}

impl ApiScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    pub fn grants(&self) -> Vec<Grant> {
        match self {
            Self::Read => OPERATIONAL.map(|r| (r, Action::Read)).to_vec(),
            Self::Write => OPERATIONAL
                .into_iter()
                .flat_map(|r| [Action::Read, Action::Create, Action::Update].map(|a| (r, a)))
                .collect(),
            Self::Admin => vec![(Resource::All, Action::All)],
        }
    }

    /// Rules granting this scope to `policy_type` within `domain`.
    pub fn policy_rules(&self, policy_type: &str, domain: &Domain) -> Vec<PolicyRule> {
        self.grants()
            .into_iter()
            .map(|(resource, action)| {
                PolicyRule::new(
                    RoleOrPolicyType::Custom(policy_type.to_string()),
                    resource,
                    action,
                    domain.clone(),
                )
            })
            .collect()
    }
}

impl fmt::Display for ApiScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiScope {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            _ => Err(ParseError::Scope(s.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
