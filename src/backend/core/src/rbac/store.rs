//! Durable policy storage.
//!
//! Rules are persisted in the two-relation RBAC-with-domains row layout:
//!
//! | ptype | v0               | v1       | v2     | v3     |
//! |-------|------------------|----------|--------|--------|
//! | `p`   | role/policy type | resource | action | domain |
//! | `g`   | user             | role     | domain |        |
//!
//! The layout is shared with existing deployments and must not change.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use super::models::{Domain, ParseError, PolicyRule, RoleAssignment, RoleOrPolicyType, UserId};
use crate::error::Result;

pub const POLICY_PTYPE: &str = "p";
pub const GROUPING_PTYPE: &str = "g";

// ═══════════════════════════════════════════════════════════════════════════════
// Row
// ═══════════════════════════════════════════════════════════════════════════════

/// One persisted rule row. Unused trailing columns hold the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::FromRow)]
pub struct CasbinRule {
    pub ptype: String,
    pub v0: String,
    pub v1: String,
    pub v2: String,
    pub v3: String,
    pub v4: String,
    pub v5: String,
}

impl CasbinRule {
    fn row(ptype: &str, values: [&str; 4]) -> Self {
        Self {
            ptype: ptype.to_string(),
            v0: values[0].to_string(),
            v1: values[1].to_string(),
            v2: values[2].to_string(),
            v3: values[3].to_string(),
            v4: String::new(),
            v5: String::new(),
        }
    }
}

impl From<&PolicyRule> for CasbinRule {
    fn from(rule: &PolicyRule) -> Self {
        Self::row(
            POLICY_PTYPE,
            [
                rule.subject.as_str(),
                rule.resource.as_str(),
                rule.action.as_str(),
                rule.domain.as_str(),
            ],
        )
    }
}

impl From<&RoleAssignment> for CasbinRule {
    fn from(assignment: &RoleAssignment) -> Self {
        Self::row(
            GROUPING_PTYPE,
            [
                assignment.user.as_str(),
                assignment.role.as_str(),
                assignment.domain.as_str(),
                "",
            ],
        )
    }
}

/// A decoded row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredRule {
    Policy(PolicyRule),
    Grouping(RoleAssignment),
}

/// Why a persisted row could not be decoded.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("unsupported ptype '{0}'")]
    UnsupportedPtype(String),

    #[error("empty field v{0}")]
    EmptyField(u8),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

fn required(value: &str, index: u8) -> std::result::Result<&str, RowError> {
    if value.is_empty() {
        Err(RowError::EmptyField(index))
    } else {
        Ok(value)
    }
}

impl TryFrom<&CasbinRule> for StoredRule {
    type Error = RowError;

    fn try_from(row: &CasbinRule) -> std::result::Result<Self, Self::Error> {
        match row.ptype.as_str() {
            POLICY_PTYPE => Ok(Self::Policy(PolicyRule {
                subject: RoleOrPolicyType::parse(required(&row.v0, 0)?),
                resource: required(&row.v1, 1)?.parse()?,
                action: required(&row.v2, 2)?.parse()?,
                domain: Domain::parse(required(&row.v3, 3)?)?,
            })),
            GROUPING_PTYPE => Ok(Self::Grouping(RoleAssignment {
                user: UserId::new(required(&row.v0, 0)?),
                role: RoleOrPolicyType::parse(required(&row.v1, 1)?),
                domain: Domain::parse(required(&row.v2, 2)?)?,
            })),
            other => Err(RowError::UnsupportedPtype(other.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable, queryable storage of policy and grouping rows.
///
/// Implementations must be thread-safe. Adding a row that already exists and
/// removing a row that does not exist both succeed without effect.
#[async_trait]
pub trait PolicyStore: Send + Sync + 'static {
    /// Load every persisted row.
    async fn load_rules(&self) -> Result<Vec<CasbinRule>>;

    /// Persist one row.
    async fn add_rule(&self, rule: &CasbinRule) -> Result<()>;

    /// Delete one row.
    async fn remove_rule(&self, rule: &CasbinRule) -> Result<()>;

    async fn add_policy(&self, rule: &PolicyRule) -> Result<()> {
        self.add_rule(&CasbinRule::from(rule)).await
    }

    async fn remove_policy(&self, rule: &PolicyRule) -> Result<()> {
        self.remove_rule(&CasbinRule::from(rule)).await
    }

    async fn add_grouping(&self, assignment: &RoleAssignment) -> Result<()> {
        self.add_rule(&CasbinRule::from(assignment)).await
    }

    async fn remove_grouping(&self, assignment: &RoleAssignment) -> Result<()> {
        self.remove_rule(&CasbinRule::from(assignment)).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory Store
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory policy store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    rows: RwLock<BTreeSet<CasbinRule>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed the store with policy rules and role assignments.
    pub fn with_rules(
        policies: impl IntoIterator<Item = PolicyRule>,
        assignments: impl IntoIterator<Item = RoleAssignment>,
    ) -> Self {
        let mut rows = BTreeSet::new();
        rows.extend(policies.into_iter().map(|p| CasbinRule::from(&p)));
        rows.extend(assignments.into_iter().map(|g| CasbinRule::from(&g)));
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// Insert a raw row, bypassing any engine. Simulates a write made by
    /// another process.
    pub fn insert_raw(&self, row: CasbinRule) {
        self.rows.write().insert(row);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn contains(&self, row: &CasbinRule) -> bool {
        self.rows.read().contains(row)
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load_rules(&self) -> Result<Vec<CasbinRule>> {
        Ok(self.rows.read().iter().cloned().collect())
    }

    async fn add_rule(&self, rule: &CasbinRule) -> Result<()> {
        self.rows.write().insert(rule.clone());
        Ok(())
    }

    async fn remove_rule(&self, rule: &CasbinRule) -> Result<()> {
        self.rows.write().remove(rule);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
