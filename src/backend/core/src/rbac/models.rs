//! RBAC data models: roles, resources, actions, domains, and the two rule kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when parsing stored or user-supplied policy strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown role: {0}")]
    Role(String),

    #[error("Unknown resource: {0}")]
    Resource(String),

    #[error("Unknown action: {0}")]
    Action(String),

    #[error("Unknown API token scope: {0}")]
    Scope(String),

    #[error("Domain must not be empty")]
    EmptyDomain,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A scoping namespace for rules: `"global"`, an organization id or a project id.
///
/// Domains never nest. A rule in an organization's domain says nothing about
/// that organization's projects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Domain(String);

impl Domain {
    /// The one domain with a built-in inheritance edge (`admin` → `owner`).
    pub const GLOBAL: &'static str = "global";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a domain, rejecting the empty string.
    pub fn parse(id: impl Into<String>) -> Result<Self, ParseError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ParseError::EmptyDomain);
        }
        Ok(Self(id))
    }

    pub fn global() -> Self {
        Self(Self::GLOBAL.to_string())
    }

    pub fn is_global(&self) -> bool {
        self.0 == Self::GLOBAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// The fixed, totally ordered roles: `Viewer < Member < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl Role {
    /// Stored form of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "VIEWER",
            Self::Member => "MEMBER",
            Self::Admin => "ADMIN",
            Self::Owner => "OWNER",
        }
    }

    /// Position in the ordering; higher outranks lower.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Viewer => 0,
            Self::Member => 1,
            Self::Admin => 2,
            Self::Owner => 3,
        }
    }

    /// True if this role is at least `minimum`.
    pub fn satisfies(&self, minimum: Role) -> bool {
        self.rank() >= minimum.rank()
    }

    /// All roles, lowest first.
    pub fn all() -> [Role; 4] {
        [Self::Viewer, Self::Member, Self::Admin, Self::Owner]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VIEWER" => Ok(Self::Viewer),
            "MEMBER" => Ok(Self::Member),
            "ADMIN" => Ok(Self::Admin),
            "OWNER" => Ok(Self::Owner),
            _ => Err(ParseError::Role(s.to_string())),
        }
    }
}

/// Subject of a policy rule: one of the ordered roles, or a free-form policy
/// type used by machine credentials (for example `api_read_3f2a…`).
///
/// Policy types only take part in direct rule matching, never in the ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleOrPolicyType {
    Role(Role),
    Custom(String),
}

impl RoleOrPolicyType {
    /// Parse a stored subject. Known role names become `Role`, anything else
    /// becomes `Custom`.
    pub fn parse(s: &str) -> Self {
        s.parse::<Role>()
            .map(Self::Role)
            .unwrap_or_else(|_| Self::Custom(s.to_string()))
    }

    pub fn as_role(&self) -> Option<Role> {
        match self {
            Self::Role(role) => Some(*role),
            Self::Custom(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Role(role) => role.as_str(),
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for RoleOrPolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Role> for RoleOrPolicyType {
    fn from(role: Role) -> Self {
        Self::Role(role)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource
// ═══════════════════════════════════════════════════════════════════════════════

/// Object classes that rules can grant access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Project,
    Organization,
    User,
    Billing,
    ApiToken,
    ApiKey,
    AuditLog,
    AuthToken,
    Customer,
    Reward,
    Campaign,
    Membership,
    Integration,
    ProjectSettings,
    Policy,
    /// `*`: matches every resource when stored in a rule.
    #[serde(rename = "*")]
    All,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Organization => "organization",
            Self::User => "user",
            Self::Billing => "billing",
            Self::ApiToken => "api_token",
            Self::ApiKey => "api_key",
            Self::AuditLog => "audit_log",
            Self::AuthToken => "auth_token",
            Self::Customer => "customer",
            Self::Reward => "reward",
            Self::Campaign => "campaign",
            Self::Membership => "membership",
            Self::Integration => "integration",
            Self::ProjectSettings => "project_settings",
            Self::Policy => "policy",
            Self::All => "*",
        }
    }

    /// Whether a rule storing `self` covers a request for `requested`.
    pub fn covers(&self, requested: Resource) -> bool {
        match self {
            Self::All => true,
            stored => *stored == requested,
        }
    }

    /// Every concrete resource (the wildcard excluded).
    pub fn concrete() -> [Resource; 15] {
        [
            Self::Project,
            Self::Organization,
            Self::User,
            Self::Billing,
            Self::ApiToken,
            Self::ApiKey,
            Self::AuditLog,
            Self::AuthToken,
            Self::Customer,
            Self::Reward,
            Self::Campaign,
            Self::Membership,
            Self::Integration,
            Self::ProjectSettings,
            Self::Policy,
        ]
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::All);
        }
        Self::concrete()
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ParseError::Resource(s.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Action
// ═══════════════════════════════════════════════════════════════════════════════

/// Operations on a resource. `Manage` is its own action and implies nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Manage,
    /// `*`: matches every action when stored in a rule.
    #[serde(rename = "*")]
    All,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Manage => "manage",
            Self::All => "*",
        }
    }

    /// Whether a rule storing `self` covers a request for `requested`.
    pub fn covers(&self, requested: Action) -> bool {
        match self {
            Self::All => true,
            stored => *stored == requested,
        }
    }

    /// The four CRUD actions.
    pub fn crud() -> [Action; 4] {
        [Self::Create, Self::Read, Self::Update, Self::Delete]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "manage" => Ok(Self::Manage),
            "*" => Ok(Self::All),
            _ => Err(ParseError::Action(s.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rules
// ═══════════════════════════════════════════════════════════════════════════════

/// A grant: any subject holding `subject` in `domain` may perform `action`
/// on `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: RoleOrPolicyType,
    pub resource: Resource,
    pub action: Action,
    pub domain: Domain,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<RoleOrPolicyType>,
        resource: Resource,
        action: Action,
        domain: impl Into<Domain>,
    ) -> Self {
        Self {
            subject: subject.into(),
            resource,
            action,
            domain: domain.into(),
        }
    }

    /// Whether this rule grants `(resource, action)`.
    pub fn grants(&self, resource: Resource, action: Action) -> bool {
        self.resource.covers(resource) && self.action.covers(action)
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p, {}, {}, {}, {}",
            self.subject, self.resource, self.action, self.domain
        )
    }
}

/// A membership fact: `user` holds `role` within `domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user: UserId,
    pub role: RoleOrPolicyType,
    pub domain: Domain,
}

impl RoleAssignment {
    pub fn new(
        user: impl Into<UserId>,
        role: impl Into<RoleOrPolicyType>,
        domain: impl Into<Domain>,
    ) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for RoleAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g, {}, {}, {}", self.user, self.role, self.domain)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
