//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; the host process decides which
//! recorder (if any) is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

pub const DECISIONS_TOTAL: &str = "bastion_decisions_total";
pub const POLICY_MUTATIONS_TOTAL: &str = "bastion_policy_mutations_total";
pub const ENGINE_LOADS_TOTAL: &str = "bastion_engine_loads_total";
pub const ENGINE_LOAD_SECONDS: &str = "bastion_engine_load_seconds";
pub const TOKEN_CHECKS_TOTAL: &str = "bastion_token_checks_total";
pub const ERRORS_TOTAL: &str = "bastion_errors_total";

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(DECISIONS_TOTAL, "Enforcement decisions, labelled by outcome");
    describe_counter!(
        POLICY_MUTATIONS_TOTAL,
        "Policy and role-assignment mutations applied, labelled by operation"
    );
    describe_counter!(
        ENGINE_LOADS_TOTAL,
        "Full rule-set loads from the policy store, labelled by result"
    );
    describe_histogram!(ENGINE_LOAD_SECONDS, "Duration of full rule-set loads");
    describe_counter!(
        TOKEN_CHECKS_TOTAL,
        "Auth token permission checks, labelled by outcome"
    );
    describe_counter!(ERRORS_TOTAL, "Errors constructed, labelled by code");
}

pub fn record_decision(allowed: bool) {
    counter!(DECISIONS_TOTAL, "allowed" => allowed.to_string()).increment(1);
}

pub fn record_mutation(operation: &'static str) {
    counter!(POLICY_MUTATIONS_TOTAL, "operation" => operation).increment(1);
}

pub fn record_engine_load(success: bool, elapsed: Duration) {
    let result = if success { "success" } else { "failure" };
    counter!(ENGINE_LOADS_TOTAL, "result" => result).increment(1);
    histogram!(ENGINE_LOAD_SECONDS).record(elapsed.as_secs_f64());
}

/// Outcome of a token check, as reported in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheckOutcome {
    Allowed,
    Denied,
    Invalid,
}

impl TokenCheckOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Invalid => "invalid",
        }
    }
}

pub fn record_token_check(outcome: TokenCheckOutcome) {
    counter!(TOKEN_CHECKS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}
