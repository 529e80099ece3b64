//! iac-harness: test harness for Terraform configurations.
//!
//! Runs the validator, linter and security scanner over a directory, scores
//! the declared resources against YAML/JSON policies, optionally deploys the
//! configuration into LocalStack or AWS for runtime checks, and renders the
//! combined result for humans and CI systems.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use iacharness::config::Config;
//! use iacharness::exec::SystemRunner;
//!
//! let config = Config::default();
//! let report = iacharness::run_static(&SystemRunner, &config, Path::new("./infra"));
//! println!("Status: {}", report.summary.overall_status);
//! ```

pub mod analysis;
pub mod ci;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod evaluation;
pub mod exec;
pub mod ir;
pub mod output;
pub mod parser;
pub mod policy;
pub mod tools;

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use analysis::{AnalysisReport, StaticChecker};
use config::Config;
use dynamic::cloud::CloudInspector;
use dynamic::{DynamicReport, DynamicTester, Environment};
use error::Result;
use exec::CommandRunner;
use ir::{OverallStatus, PhaseOutcome};
use policy::compliance::{ComplianceChecker, ComplianceReport};
use policy::{PoliciesSummary, PolicySet};

/// Overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Path to config file (defaults to `.iac-harness.toml` in the target dir).
    pub config_path: Option<PathBuf>,
    pub policies_dir: Option<PathBuf>,
    pub environment: Option<Environment>,
    /// Destroy deployed resources after the runtime checks.
    pub destroy: bool,
}

/// Load the configuration for `dir` and apply CLI overrides.
pub fn load_config(dir: &Path, options: &RunOptions) -> Result<Config> {
    let path = Config::locate(dir, options.config_path.as_deref());
    let mut config = Config::load(&path)?;
    if let Some(policies) = &options.policies_dir {
        config.policy.dir = policies.clone();
    }
    if let Some(environment) = options.environment {
        config.dynamic.environment = environment;
    }
    if options.destroy {
        config.dynamic.destroy = true;
    }
    Ok(config)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    StaticAnalysis,
    PolicyCompliance,
    DynamicTesting,
    StaticAndCompliance,
    Comprehensive,
}

/// Check counts across every phase that ran.
///
/// The static phase is one check (passed when its status is `PASSED`), each
/// policy is one check, and each runtime test is one check. A phase that
/// could not run counts as a single failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSummary {
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub success_rate: f64,
    pub overall_status: OverallStatus,
}

impl CombinedSummary {
    pub fn from_phases(
        static_analysis: Option<&PhaseOutcome<AnalysisReport>>,
        policy_compliance: Option<&PhaseOutcome<ComplianceReport>>,
        dynamic_testing: Option<&DynamicReport>,
    ) -> Self {
        let mut passed = 0;
        let mut failed = 0;

        if let Some(outcome) = static_analysis {
            match outcome.report() {
                Some(r) if r.summary.overall_status.is_passed() => passed += 1,
                _ => failed += 1,
            }
        }

        if let Some(outcome) = policy_compliance {
            match outcome.report() {
                Some(r) => {
                    passed += r.passed_policies;
                    failed += r.failed_policies;
                }
                None => failed += 1,
            }
        }

        if let Some(dynamic) = dynamic_testing {
            match dynamic.runtime_tests.as_ref().and_then(PhaseOutcome::report) {
                Some(r) => {
                    passed += r.passed_tests;
                    failed += r.failed_tests;
                }
                None => failed += 1,
            }
        }

        let total = passed + failed;
        let static_status = static_analysis
            .and_then(PhaseOutcome::report)
            .map(|r| r.summary.overall_status);
        let overall_status = if failed == 0 {
            OverallStatus::Passed
        } else {
            static_status
                .unwrap_or(OverallStatus::NeedsAttention)
                .max(OverallStatus::NeedsAttention)
        };

        Self {
            total_checks: total,
            passed_checks: passed,
            failed_checks: failed,
            success_rate: if total > 0 {
                passed as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            overall_status,
        }
    }
}

/// Everything one CLI invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub analysis_timestamp: String,
    pub terraform_directory: String,
    pub analysis_type: AnalysisType,
    /// Wall-clock seconds for the whole run.
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_analysis: Option<PhaseOutcome<AnalysisReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_compliance: Option<PhaseOutcome<ComplianceReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_testing: Option<DynamicReport>,
    pub summary: CombinedSummary,
}

impl RunReport {
    fn assemble(
        dir: &Path,
        analysis_type: AnalysisType,
        started: (String, Instant),
        static_analysis: Option<PhaseOutcome<AnalysisReport>>,
        policy_compliance: Option<PhaseOutcome<ComplianceReport>>,
        dynamic_testing: Option<DynamicReport>,
    ) -> Self {
        let summary = CombinedSummary::from_phases(
            static_analysis.as_ref(),
            policy_compliance.as_ref(),
            dynamic_testing.as_ref(),
        );
        Self {
            analysis_timestamp: started.0,
            terraform_directory: dir.display().to_string(),
            analysis_type,
            execution_time: started.1.elapsed().as_secs_f64(),
            static_analysis,
            policy_compliance,
            dynamic_testing,
            summary,
        }
    }

    pub fn passed(&self) -> bool {
        self.summary.overall_status.is_passed()
    }
}

fn start() -> (String, Instant) {
    (chrono::Utc::now().to_rfc3339(), Instant::now())
}

fn static_phase(runner: &dyn CommandRunner, config: &Config, dir: &Path) -> PhaseOutcome<AnalysisReport> {
    StaticChecker::new(runner, config).analyze(dir)
}

fn policy_phase(
    runner: &dyn CommandRunner,
    config: &Config,
    dir: &Path,
) -> PhaseOutcome<ComplianceReport> {
    let policies = PolicySet::load(&config.policy.dir);
    let mut checker = ComplianceChecker::new(policies);
    if let Some(rego) = &config.policy.opa_policy {
        checker = checker.with_policy_engine(runner, config, rego.clone());
    }
    checker.check_compliance(dir)
}

pub fn run_static(runner: &dyn CommandRunner, config: &Config, dir: &Path) -> RunReport {
    let started = start();
    let outcome = static_phase(runner, config, dir);
    RunReport::assemble(dir, AnalysisType::StaticAnalysis, started, Some(outcome), None, None)
}

pub fn run_policy(runner: &dyn CommandRunner, config: &Config, dir: &Path) -> RunReport {
    let started = start();
    let outcome = policy_phase(runner, config, dir);
    RunReport::assemble(dir, AnalysisType::PolicyCompliance, started, None, Some(outcome), None)
}

pub fn run_dynamic(
    runner: &dyn CommandRunner,
    inspector: &dyn CloudInspector,
    config: &Config,
    dir: &Path,
) -> RunReport {
    let started = start();
    let report = DynamicTester::new(runner, inspector, config).run(dir);
    RunReport::assemble(dir, AnalysisType::DynamicTesting, started, None, None, Some(report))
}

/// Static analysis and policy compliance, plus the provisioning phase when
/// an inspector is given. A failing phase never stops the next one.
pub fn run_comprehensive(
    runner: &dyn CommandRunner,
    inspector: Option<&dyn CloudInspector>,
    config: &Config,
    dir: &Path,
) -> RunReport {
    let started = start();
    let static_analysis = static_phase(runner, config, dir);
    let policy_compliance = policy_phase(runner, config, dir);
    let dynamic_testing =
        inspector.map(|inspector| DynamicTester::new(runner, inspector, config).run(dir));
    let analysis_type = if dynamic_testing.is_some() {
        AnalysisType::Comprehensive
    } else {
        AnalysisType::StaticAndCompliance
    };
    RunReport::assemble(
        dir,
        analysis_type,
        started,
        Some(static_analysis),
        Some(policy_compliance),
        dynamic_testing,
    )
}

pub fn list_policies(config: &Config) -> PoliciesSummary {
    PolicySet::load(&config.policy.dir).summary()
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::dynamic::cloud::testing::FakeCloud;
    use crate::exec::testing::{Scripted, ScriptedRunner};
    use crate::policy::evaluate::PolicyStatus;
    use pretty_assertions::assert_eq;

    const BASIC: &str = "tests/fixtures/terraform/basic";
    const NO_TF: &str = "tests/fixtures/terraform/no_tf";
    const POLICIES: &str = "tests/fixtures/policies";

    const VALID: &str =
        r#"{"valid": true, "error_count": 0, "warning_count": 0, "diagnostics": []}"#;
    const CHECKOV_CRITICAL: &str = r#"{"check_type": "terraform", "results": {
        "failed_checks": [{"check_id": "CKV_AWS_24", "check_name": "Ensure no security groups allow ingress from 0.0.0.0:0 to port 22",
                           "severity": "CRITICAL", "resource": "aws_security_group.ssh", "file_path": "/main.tf", "file_line_range": [20, 30]}],
        "passed_checks": []}}"#;

    fn config() -> Config {
        let mut config = Config::default();
        config.policy.dir = PathBuf::from(POLICIES);
        config
    }

    fn clean_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .ok("terraform init", "")
            .ok("terraform validate", VALID)
            .ok("tflint", r#"{"issues": [], "errors": []}"#)
            .ok("checkov", "")
    }

    #[test]
    fn basic_fixture_resources_and_policies() {
        let report = run_policy(&ScriptedRunner::new(), &config(), Path::new(BASIC));
        let compliance = report.policy_compliance.as_ref().unwrap().report().unwrap();
        assert_eq!(compliance.resources_found, 4);
        assert_eq!(compliance.total_policies, 3);

        let by_name = |name: &str| {
            compliance
                .results
                .iter()
                .find(|r| r.policy_name == name)
                .unwrap()
        };
        // required rule on a present bucket always fires
        assert_eq!(by_name("s3-encryption").status, PolicyStatus::Failed);
        assert_eq!(by_name("s3-encryption").applicable_resources, 1);
        // no RDS instances in the fixture
        assert_eq!(by_name("rds-encryption").applicable_resources, 0);
        assert_eq!(by_name("rds-encryption").status, PolicyStatus::Passed);
        assert_eq!(report.summary.total_checks, 3);
    }

    #[test]
    fn clean_static_run_passes() {
        let report = run_static(&clean_runner(), &config(), Path::new(BASIC));
        assert_eq!(report.analysis_type, AnalysisType::StaticAnalysis);
        assert_eq!(report.summary.overall_status, OverallStatus::Passed);
        assert_eq!(report.summary.total_checks, 1);
        assert!(report.passed());
    }

    #[test]
    fn static_phase_error_does_not_block_policy_phase() {
        let report = run_comprehensive(&ScriptedRunner::new(), None, &config(), Path::new(NO_TF));
        let static_outcome = report.static_analysis.as_ref().unwrap();
        assert!(static_outcome
            .error_message()
            .unwrap()
            .contains("No Terraform files found"));
        let policy_outcome = report.policy_compliance.as_ref().unwrap();
        assert_eq!(policy_outcome.status_name(), "error");
        assert_eq!(report.analysis_type, AnalysisType::StaticAndCompliance);
        assert_eq!(report.summary.failed_checks, 2);
    }

    #[test]
    fn validator_timeout_breaks_the_build() {
        let runner = ScriptedRunner::new()
            .ok("terraform init", "")
            .on("terraform validate", Scripted::Timeout)
            .ok("tflint", r#"{"issues": [], "errors": []}"#)
            .ok("checkov", "");
        let report = run_static(&runner, &config(), Path::new(BASIC));
        let summary = &report.static_analysis.as_ref().unwrap().report().unwrap().summary;
        assert_eq!(summary.overall_status, OverallStatus::ToolError);
        assert!(!summary.validation_passed);
        assert!(ci::is_breaking(&report));
    }

    #[test]
    fn critical_finding_drives_combined_status() {
        let runner = ScriptedRunner::new()
            .ok("terraform init", "")
            .ok("terraform validate", VALID)
            .exit("tflint", 2, r#"{"issues": [{"rule": {"name": "aws_instance_invalid_type", "severity": "warning"}, "message": "t1.2xlarge is invalid"}], "errors": []}"#, "")
            .exit("checkov", 1, CHECKOV_CRITICAL, "");
        let report = run_comprehensive(&runner, None, &config(), Path::new(BASIC));
        let static_report = report.static_analysis.as_ref().unwrap().report().unwrap();
        assert_eq!(static_report.summary.overall_status, OverallStatus::CriticalIssues);
        assert_eq!(report.summary.overall_status, OverallStatus::CriticalIssues);
        assert!(ci::is_breaking(&report));
    }

    #[test]
    fn comprehensive_with_dynamic_phase() {
        let state = r#"{"values": {"root_module": {"resources": [
            {"address": "aws_vpc.main", "type": "aws_vpc", "name": "main", "values": {}}]}}}"#;
        let runner = clean_runner()
            .ok("terraform plan", "")
            .ok("terraform apply", "")
            .ok("terraform show", state);
        let cloud = FakeCloud::healthy();
        let report = run_comprehensive(&runner, Some(&cloud), &config(), Path::new(BASIC));
        assert_eq!(report.analysis_type, AnalysisType::Comprehensive);
        let dynamic = report.dynamic_testing.as_ref().unwrap();
        assert!(dynamic.passed());
        let runtime_total = dynamic.summary.total_tests;
        assert_eq!(report.summary.total_checks, 1 + 3 + runtime_total);
    }

    #[test]
    fn run_report_json_round_trip() {
        let report = run_comprehensive(&clean_runner(), None, &config(), Path::new(BASIC));
        let json = serde_json::to_string_pretty(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn overrides_apply_on_top_of_config_file() {
        let options = RunOptions {
            policies_dir: Some(PathBuf::from("custom-policies")),
            environment: Some(Environment::Aws),
            destroy: true,
            ..Default::default()
        };
        let config = load_config(Path::new(BASIC), &options).unwrap();
        assert_eq!(config.policy.dir, PathBuf::from("custom-policies"));
        assert_eq!(config.dynamic.environment, Environment::Aws);
        assert!(config.dynamic.destroy);
    }

    #[test]
    fn policy_listing() {
        let summary = list_policies(&config());
        assert_eq!(summary.total_policies, 3);
        let names: Vec<_> = summary.policies.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["rds-encryption", "s3-encryption", "security-group-ingress"]);
    }
}
