use serde::{Deserialize, Serialize};

use super::{Policy, PolicySet, Rule};
use crate::ir::{Resource, Severity};

/// One resource failing one rule of one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Resource address (`TYPE.NAME`).
    pub resource: String,
    pub resource_type: String,
    pub rule: String,
    pub policy: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyStatus {
    Passed,
    Failed,
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub policy_name: String,
    pub description: String,
    pub status: PolicyStatus,
    pub applicable_resources: usize,
    pub violations: Vec<Violation>,
    pub violation_count: usize,
}

/// Check one rule against one resource.
///
/// Only resource headers are extracted, never attribute bodies, so the
/// property cannot be looked up: every `required` rule is reported as a
/// violation for every applicable resource. This makes a required rule a
/// marker that always fires rather than a real presence check.
pub fn check_rule(resource: &Resource, rule: &Rule, policy_name: &str) -> Option<Violation> {
    if rule.property.is_empty() || !rule.required {
        return None;
    }
    Some(Violation {
        resource: resource.address.clone(),
        resource_type: resource.resource_type.clone(),
        rule: format!(
            "Property {} is required but not validated in simple parsing",
            rule.property
        ),
        policy: policy_name.to_string(),
        severity: Severity::Medium,
    })
}

/// Evaluate one policy over the extracted resources.
///
/// A policy whose resource types match nothing passes with zero applicable
/// resources.
pub fn evaluate_policy(policy: &Policy, resources: &[Resource]) -> PolicyResult {
    let applicable: Vec<&Resource> = resources
        .iter()
        .filter(|r| policy.applies_to(&r.resource_type))
        .collect();

    let violations: Vec<Violation> = applicable
        .iter()
        .flat_map(|resource| {
            policy
                .rules
                .iter()
                .filter_map(|rule| check_rule(resource, rule, &policy.name))
        })
        .collect();

    PolicyResult {
        policy_name: policy.name.clone(),
        description: policy.description.clone(),
        status: if violations.is_empty() {
            PolicyStatus::Passed
        } else {
            PolicyStatus::Failed
        },
        applicable_resources: applicable.len(),
        violation_count: violations.len(),
        violations,
    }
}

/// Evaluate every policy, in policy-name order.
pub fn evaluate_all(policies: &PolicySet, resources: &[Resource]) -> Vec<PolicyResult> {
    policies
        .iter()
        .map(|policy| evaluate_policy(policy, resources))
        .collect()
}

/// Violations for a single resource across every applicable policy.
pub fn violations_for_resource(policies: &PolicySet, resource: &Resource) -> Vec<Violation> {
    policies
        .iter()
        .filter(|p| p.applies_to(&resource.resource_type))
        .flat_map(|p| {
            p.rules
                .iter()
                .filter_map(move |rule| check_rule(resource, rule, &p.name))
        })
        .collect()
}
