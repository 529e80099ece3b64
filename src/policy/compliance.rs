use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::evaluate::{evaluate_all, PolicyResult, PolicyStatus};
use super::PolicySet;
use crate::config::Config;
use crate::error::HarnessError;
use crate::exec::CommandRunner;
use crate::ir::{PhaseOutcome, Resource};
use crate::parser::terraform::TerraformExtractor;
use crate::parser::{extract_resources, ResourceExtractor};
use crate::tools::opa::{self, PolicyEngineReport};
use crate::tools::ToolOutcome;

/// Percentage of policies that passed; 0 when there are no policies.
pub fn compliance_score(passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    passed as f64 / total as f64 * 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub terraform_directory: String,
    pub analysis_timestamp: String,
    pub resources_found: usize,
    pub total_policies: usize,
    pub passed_policies: usize,
    pub failed_policies: usize,
    pub compliance_score: f64,
    pub overall_status: PolicyStatus,
    pub results: Vec<PolicyResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_engine: Option<ToolOutcome<PolicyEngineReport>>,
}

impl ComplianceReport {
    /// Aggregate per-policy results. Every policy weighs the same regardless
    /// of how many rules or resources it covers.
    pub fn from_results(directory: &Path, resources_found: usize, results: Vec<PolicyResult>) -> Self {
        let total = results.len();
        let passed = results
            .iter()
            .filter(|r| r.status == PolicyStatus::Passed)
            .count();
        let failed = total - passed;
        Self {
            terraform_directory: directory.display().to_string(),
            analysis_timestamp: chrono::Utc::now().to_rfc3339(),
            resources_found,
            total_policies: total,
            passed_policies: passed,
            failed_policies: failed,
            compliance_score: compliance_score(passed, total),
            overall_status: if failed == 0 {
                PolicyStatus::Passed
            } else {
                PolicyStatus::Failed
            },
            results,
            policy_engine: None,
        }
    }

    /// Every violation across all policies, in policy order.
    pub fn violations(&self) -> impl Iterator<Item = &super::evaluate::Violation> {
        self.results.iter().flat_map(|r| r.violations.iter())
    }
}

struct PolicyEngine<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
    policy_file: PathBuf,
}

/// Scores a Terraform directory against a loaded policy set.
///
/// Each call returns a fresh report; nothing accumulates between runs.
pub struct ComplianceChecker<'a> {
    policies: PolicySet,
    extractor: Box<dyn ResourceExtractor>,
    engine: Option<PolicyEngine<'a>>,
}

impl<'a> ComplianceChecker<'a> {
    pub fn new(policies: PolicySet) -> Self {
        Self {
            policies,
            extractor: Box::new(TerraformExtractor),
            engine: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn ResourceExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Also evaluate a Rego policy with `opa eval`. Its verdict is attached
    /// to the report but does not affect the score.
    pub fn with_policy_engine(
        mut self,
        runner: &'a dyn CommandRunner,
        config: &'a Config,
        policy_file: PathBuf,
    ) -> Self {
        self.engine = Some(PolicyEngine {
            runner,
            config,
            policy_file,
        });
        self
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn check_compliance(&self, dir: &Path) -> PhaseOutcome<ComplianceReport> {
        if self.policies.is_empty() {
            return PhaseOutcome::error("No policies loaded");
        }

        let resources = match extract_resources(dir, self.extractor.as_ref()) {
            Ok(resources) => resources,
            Err(e) => return PhaseOutcome::error(e.to_string()),
        };
        if resources.is_empty() {
            return PhaseOutcome::error("No Terraform resources found");
        }

        tracing::info!(
            dir = %dir.display(),
            resources = resources.len(),
            policies = self.policies.len(),
            "checking policy compliance"
        );

        let results = evaluate_all(&self.policies, &resources);
        let mut report = ComplianceReport::from_results(dir, resources.len(), results);
        if let Some(engine) = &self.engine {
            report.policy_engine = Some(run_engine(engine, &resources));
        }
        PhaseOutcome::Success(report)
    }
}

/// Feed the extracted inventory to `opa eval` through a scratch input file.
fn run_engine(engine: &PolicyEngine<'_>, resources: &[Resource]) -> ToolOutcome<PolicyEngineReport> {
    let input = std::env::temp_dir().join(format!(
        "iac-harness-opa-input-{}-{}.json",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let document = serde_json::json!({ "resources": resources });
    let written = serde_json::to_vec_pretty(&document)
        .map_err(HarnessError::from)
        .and_then(|bytes| std::fs::write(&input, bytes).map_err(HarnessError::from));
    if let Err(e) = written {
        return ToolOutcome::Error {
            error_message: format!("Could not write policy engine input: {}", e),
        };
    }

    let outcome = opa::run(engine.runner, &input, &engine.policy_file, engine.config);
    if let Err(e) = std::fs::remove_file(&input) {
        tracing::debug!(path = %input.display(), error = %e, "could not remove policy engine input");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use crate::policy::{Policy, Rule};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn policy(name: &str, types: &[&str], required: bool) -> Policy {
        Policy {
            name: name.into(),
            description: String::new(),
            resource_types: types.iter().map(|t| t.to_string()).collect(),
            rules: vec![Rule {
                property: "encryption".into(),
                required,
            }],
        }
    }

    fn tf_dir(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), content).unwrap();
        dir
    }

    #[test]
    fn encryption_scenario_fails_with_zero_score() {
        let dir = tf_dir("resource \"storage_bucket\" \"b1\" {\n}\n");
        let checker = ComplianceChecker::new(PolicySet::from_policies([policy(
            "encryption",
            &["storage_bucket"],
            true,
        )]));
        let report = checker.check_compliance(dir.path()).report().cloned().unwrap();
        assert_eq!(report.resources_found, 1);
        assert_eq!(report.results[0].applicable_resources, 1);
        assert_eq!(report.results[0].violation_count, 1);
        assert_eq!(report.results[0].status, PolicyStatus::Failed);
        assert_eq!(report.compliance_score, 0.0);
        assert_eq!(report.overall_status, PolicyStatus::Failed);
    }

    #[test]
    fn empty_policy_set_is_phase_error() {
        let dir = tf_dir("resource \"aws_vpc\" \"main\" {}\n");
        let policies_dir = tempfile::tempdir().unwrap();
        let checker = ComplianceChecker::new(PolicySet::load(policies_dir.path()));
        let outcome = checker.check_compliance(dir.path());
        assert_eq!(outcome.status_name(), "error");
        assert!(outcome.error_message().unwrap().contains("No policies loaded"));
    }

    #[test]
    fn directory_without_tf_files_is_phase_error() {
        let dir = tempfile::tempdir().unwrap();
        let checker = ComplianceChecker::new(PolicySet::from_policies([policy("p", &["x"], false)]));
        let outcome = checker.check_compliance(dir.path());
        assert!(outcome.error_message().unwrap().contains("No Terraform files found"));
    }

    #[test]
    fn files_without_resources_are_phase_error() {
        let dir = tf_dir("variable \"region\" {}\n");
        let checker = ComplianceChecker::new(PolicySet::from_policies([policy("p", &["x"], false)]));
        let outcome = checker.check_compliance(dir.path());
        assert_eq!(outcome.error_message(), Some("No Terraform resources found"));
    }

    #[test]
    fn unrelated_policies_pass_vacuously() {
        let dir = tf_dir("resource \"aws_vpc\" \"main\" {}\n");
        let checker = ComplianceChecker::new(PolicySet::from_policies([
            policy("buckets", &["aws_s3_bucket"], true),
            policy("instances", &["aws_instance"], true),
        ]));
        let report = checker.check_compliance(dir.path()).report().cloned().unwrap();
        assert_eq!(report.passed_policies, 2);
        assert_eq!(report.compliance_score, 100.0);
        assert_eq!(report.overall_status, PolicyStatus::Passed);
    }

    #[test]
    fn json_round_trip_preserves_report() {
        let dir = tf_dir(
            "resource \"aws_s3_bucket\" \"logs\" {}\nresource \"aws_vpc\" \"main\" {}\n",
        );
        let checker = ComplianceChecker::new(PolicySet::from_policies([
            policy("a", &["aws_s3_bucket"], true),
            policy("b", &["aws_vpc"], false),
            policy("c", &["aws_instance"], true),
        ]));
        let outcome = checker.check_compliance(dir.path());
        let json = serde_json::to_string(&outcome).unwrap();
        let back: PhaseOutcome<ComplianceReport> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
        let report = back.report().unwrap();
        assert!((report.compliance_score - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn policy_engine_verdict_is_attached_not_scored() {
        let dir = tf_dir("resource \"aws_vpc\" \"main\" {}\n");
        let runner = ScriptedRunner::new().ok(
            "opa eval",
            r#"{"result": [{"expressions": [{"value": ["vpc flow logs disabled"]}]}]}"#,
        );
        let config = Config::default();
        let checker = ComplianceChecker::new(PolicySet::from_policies([policy(
            "vpc",
            &["aws_vpc"],
            false,
        )]))
        .with_policy_engine(&runner, &config, PathBuf::from("deny.rego"));
        let report = checker.check_compliance(dir.path()).report().cloned().unwrap();
        assert_eq!(report.compliance_score, 100.0);
        let engine = report.policy_engine.unwrap();
        assert_eq!(engine.report().unwrap().violations.len(), 1);
    }

    #[test]
    fn zero_policies_score_zero() {
        assert_eq!(compliance_score(0, 0), 0.0);
    }

    proptest! {
        #[test]
        fn counts_partition_policies(
            specs in prop::collection::vec((0usize..4, any::<bool>()), 0..12),
            resource_types in prop::collection::vec(0usize..4, 0..10),
        ) {
            let types = ["aws_s3_bucket", "aws_instance", "aws_vpc", "aws_iam_role"];
            let policies: Vec<Policy> = specs
                .iter()
                .enumerate()
                .map(|(i, (ty, required))| policy(&format!("p{}", i), &[types[*ty]], *required))
                .collect();
            let resources: Vec<Resource> = resource_types
                .iter()
                .enumerate()
                .map(|(i, ty)| Resource::new(types[*ty], &format!("r{}", i), PathBuf::from("main.tf"), i + 1))
                .collect();

            let set = PolicySet::from_policies(policies);
            let results = evaluate_all(&set, &resources);
            let report = ComplianceReport::from_results(Path::new("."), resources.len(), results);

            prop_assert_eq!(report.passed_policies + report.failed_policies, report.total_policies);
            prop_assert_eq!(report.total_policies, set.len());
            if report.total_policies == 0 {
                prop_assert_eq!(report.compliance_score, 0.0);
            } else {
                let expected = report.passed_policies as f64 / report.total_policies as f64 * 100.0;
                prop_assert!((report.compliance_score - expected).abs() < 1e-9);
            }
            prop_assert_eq!(report.overall_status == PolicyStatus::Passed, report.failed_policies == 0);
        }

        #[test]
        fn required_rule_with_applicable_resource_always_fails(count in 1usize..6) {
            let resources: Vec<Resource> = (0..count)
                .map(|i| Resource::new("aws_s3_bucket", &format!("b{}", i), PathBuf::from("main.tf"), 1))
                .collect();
            let set = PolicySet::from_policies([policy("enc", &["aws_s3_bucket"], true)]);
            let results = evaluate_all(&set, &resources);
            prop_assert_eq!(results[0].status, PolicyStatus::Failed);
            prop_assert_eq!(results[0].violation_count, count);
        }
    }
}
