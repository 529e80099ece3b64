//! Static analysis: run the validator, linter and scanner over one
//! directory and fold their outcomes into a single status.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::exec::CommandRunner;
use crate::ir::{OverallStatus, PhaseOutcome, SeverityHistogram};
use crate::parser::discover_files;
use crate::tools::checkov::{self, ScanReport};
use crate::tools::tflint::{self, LintReport};
use crate::tools::validate::{self, ValidateReport};
use crate::tools::ToolOutcome;

/// Outcome of every tool, keyed by tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResults {
    pub terraform_validate: ToolOutcome<ValidateReport>,
    pub tflint: ToolOutcome<LintReport>,
    pub checkov: ToolOutcome<ScanReport>,
}

impl ToolResults {
    /// Validator errors; a validator that could not run counts as one.
    pub fn validation_errors(&self) -> usize {
        match &self.terraform_validate {
            ToolOutcome::Success(r) => r.error_count,
            _ => 1,
        }
    }

    pub fn validation_warnings(&self) -> usize {
        self.terraform_validate
            .report()
            .map_or(0, |r| r.warning_count)
    }

    pub fn validation_passed(&self) -> bool {
        self.terraform_validate.report().is_some_and(|r| r.valid)
    }

    pub fn linting_issues(&self) -> usize {
        self.tflint.report().map_or(0, |r| r.total_issues)
    }

    pub fn security_issues(&self) -> usize {
        self.checkov.report().map_or(0, |r| r.failed_checks)
    }

    pub fn security_histogram(&self) -> SeverityHistogram {
        self.checkov.report().map(|r| r.summary).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSummary {
    pub total_issues: usize,
    pub critical_issues: usize,
    pub validation_passed: bool,
    pub linting_issues: usize,
    pub security_issues: usize,
    pub severity: SeverityHistogram,
    pub overall_status: OverallStatus,
}

impl StaticSummary {
    pub fn from_results(results: &ToolResults) -> Self {
        let severity = results.security_histogram();
        Self {
            total_issues: results.validation_errors()
                + results.validation_warnings()
                + results.linting_issues()
                + results.security_issues(),
            critical_issues: results.validation_errors() + severity.severe(),
            validation_passed: results.validation_passed(),
            linting_issues: results.linting_issues(),
            security_issues: results.security_issues(),
            severity,
            overall_status: determine_overall_status(results),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub terraform_directory: String,
    pub terraform_files_found: usize,
    pub analysis_timestamp: String,
    pub results: ToolResults,
    pub summary: StaticSummary,
}

/// Combined status of a static scan.
///
/// Evaluated strictly in this order, first match wins:
/// 1. validator not successful, or linter/scanner neither successful nor
///    missing: `ToolError`
/// 2. validator reports invalid: `ValidationFailed`
/// 3. validator errors or critical/high findings: `CriticalIssues`
/// 4. validator warnings, medium/low findings or lint issues: `NeedsAttention`
/// 5. `Passed`
pub fn determine_overall_status(results: &ToolResults) -> OverallStatus {
    let validate = match &results.terraform_validate {
        ToolOutcome::Success(report) => report,
        _ => return OverallStatus::ToolError,
    };
    if !results.tflint.is_success_or_not_found() || !results.checkov.is_success_or_not_found() {
        return OverallStatus::ToolError;
    }

    if !validate.valid {
        return OverallStatus::ValidationFailed;
    }

    let severity = results.security_histogram();
    if validate.error_count + severity.severe() > 0 {
        return OverallStatus::CriticalIssues;
    }

    if validate.warning_count + severity.minor() + results.linting_issues() > 0 {
        return OverallStatus::NeedsAttention;
    }

    OverallStatus::Passed
}

pub struct StaticChecker<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
}

impl<'a> StaticChecker<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a Config) -> Self {
        Self { runner, config }
    }

    /// Run every tool against `dir`.
    ///
    /// The validator goes first because it performs `terraform init`; the
    /// linter and scanner only read the sources and run side by side.
    pub fn analyze(&self, dir: &Path) -> PhaseOutcome<AnalysisReport> {
        if !dir.is_dir() {
            return PhaseOutcome::error(format!("Directory {} does not exist", dir.display()));
        }
        let files = discover_files(dir, "tf");
        if files.is_empty() {
            return PhaseOutcome::error(format!("No Terraform files found in {}", dir.display()));
        }

        tracing::info!(dir = %dir.display(), files = files.len(), "starting static analysis");

        let terraform_validate = validate::run(self.runner, dir, self.config);
        let (tflint, checkov) = rayon::join(
            || tflint::run(self.runner, dir, self.config),
            || checkov::run(self.runner, dir, self.config),
        );

        let results = ToolResults {
            terraform_validate,
            tflint,
            checkov,
        };
        for (tool, status) in [
            ("terraform validate", results.terraform_validate.status_name()),
            ("tflint", results.tflint.status_name()),
            ("checkov", results.checkov.status_name()),
        ] {
            tracing::debug!(tool, status, "tool finished");
        }

        let summary = StaticSummary::from_results(&results);
        PhaseOutcome::Success(AnalysisReport {
            terraform_directory: dir.display().to_string(),
            terraform_files_found: files.len(),
            analysis_timestamp: chrono::Utc::now().to_rfc3339(),
            results,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{Scripted, ScriptedRunner};
    use crate::tools::checkov::{Check, CheckResults};
    use crate::tools::tflint::{LintIssue, LintRule};
    use pretty_assertions::assert_eq;

    fn valid(errors: usize, warnings: usize) -> ToolOutcome<ValidateReport> {
        ToolOutcome::Success(ValidateReport {
            valid: errors == 0,
            error_count: errors,
            warning_count: warnings,
            diagnostics: Vec::new(),
        })
    }

    fn lint(issues: usize) -> ToolOutcome<LintReport> {
        ToolOutcome::Success(LintReport {
            total_issues: issues,
            issues: (0..issues)
                .map(|i| LintIssue {
                    rule: LintRule {
                        name: format!("rule_{}", i),
                        severity: "warning".into(),
                        link: None,
                    },
                    message: "issue".into(),
                    range: None,
                })
                .collect(),
        })
    }

    fn scan(severities: &[&str]) -> ToolOutcome<ScanReport> {
        let failed: Vec<Check> = severities
            .iter()
            .enumerate()
            .map(|(i, s)| Check {
                check_id: format!("CKV_AWS_{}", i),
                check_name: "check".into(),
                severity: Some(s.to_string()),
                resource: "aws_s3_bucket.logs".into(),
                file_path: "/main.tf".into(),
                file_line_range: vec![1, 4],
                guideline: None,
            })
            .collect();
        let summary = SeverityHistogram::from_severities(failed.iter().map(Check::severity));
        ToolOutcome::Success(ScanReport {
            failed_checks: failed.len(),
            passed_checks: 0,
            total_checks: failed.len(),
            summary,
            results: CheckResults {
                failed,
                passed: Vec::new(),
            },
        })
    }

    fn results(
        v: ToolOutcome<ValidateReport>,
        t: ToolOutcome<LintReport>,
        c: ToolOutcome<ScanReport>,
    ) -> ToolResults {
        ToolResults {
            terraform_validate: v,
            tflint: t,
            checkov: c,
        }
    }

    #[test]
    fn clean_scan_passes() {
        let r = results(valid(0, 0), lint(0), scan(&[]));
        assert_eq!(determine_overall_status(&r), OverallStatus::Passed);
    }

    #[test]
    fn critical_finding_outranks_attention_findings() {
        let r = results(valid(0, 2), lint(3), scan(&["CRITICAL", "LOW", "MEDIUM"]));
        assert_eq!(determine_overall_status(&r), OverallStatus::CriticalIssues);
    }

    #[test]
    fn lint_issues_alone_need_attention() {
        let r = results(valid(0, 0), lint(1), scan(&[]));
        assert_eq!(determine_overall_status(&r), OverallStatus::NeedsAttention);
    }

    #[test]
    fn invalid_configuration_outranks_findings() {
        let r = results(valid(1, 0), lint(0), scan(&["HIGH"]));
        assert_eq!(determine_overall_status(&r), OverallStatus::ValidationFailed);
    }

    fn missing<T>() -> ToolOutcome<T> {
        ToolOutcome::NotFound {
            error_message: "not installed".into(),
        }
    }

    #[test]
    fn missing_linter_and_scanner_are_tolerated() {
        let r = ToolResults {
            terraform_validate: valid(0, 0),
            tflint: missing(),
            checkov: missing(),
        };
        assert_eq!(determine_overall_status(&r), OverallStatus::Passed);
    }

    #[test]
    fn missing_validator_is_tool_error() {
        let r = results(
            ToolOutcome::NotFound {
                error_message: "terraform not found".into(),
            },
            lint(0),
            scan(&[]),
        );
        assert_eq!(determine_overall_status(&r), OverallStatus::ToolError);
        assert_eq!(StaticSummary::from_results(&r).critical_issues, 1);
    }

    #[test]
    fn scanner_timeout_outranks_invalid_configuration() {
        let r = results(
            valid(2, 0),
            lint(0),
            ToolOutcome::Timeout {
                error_message: "Checkov execution timed out after 120s".into(),
            },
        );
        assert_eq!(determine_overall_status(&r), OverallStatus::ToolError);
    }

    #[test]
    fn summary_totals() {
        let r = results(valid(0, 1), lint(2), scan(&["HIGH", "LOW", "bogus"]));
        let s = StaticSummary::from_results(&r);
        assert_eq!(s.total_issues, 1 + 2 + 3);
        assert_eq!(s.critical_issues, 1);
        assert_eq!(s.severity.medium, 1);
        assert!(s.validation_passed);
        assert_eq!(s.overall_status, OverallStatus::CriticalIssues);
    }

    #[test]
    fn analyze_reports_missing_directory() {
        let runner = ScriptedRunner::new();
        let config = Config::default();
        let outcome = StaticChecker::new(&runner, &config).analyze(Path::new("/no/such/infra"));
        assert!(outcome.error_message().unwrap().contains("does not exist"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn analyze_reports_directory_without_tf_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# infra").unwrap();
        let runner = ScriptedRunner::new();
        let config = Config::default();
        let outcome = StaticChecker::new(&runner, &config).analyze(dir.path());
        assert!(outcome
            .error_message()
            .unwrap()
            .starts_with("No Terraform files found"));
    }

    #[test]
    fn analyze_runs_every_tool() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), "resource \"aws_vpc\" \"main\" {}\n").unwrap();
        let runner = ScriptedRunner::new()
            .ok("terraform init", "")
            .ok(
                "terraform validate",
                r#"{"valid": true, "error_count": 0, "warning_count": 0, "diagnostics": []}"#,
            )
            .exit(
                "tflint",
                2,
                r#"{"issues": [{"rule": {"name": "terraform_required_version", "severity": "warning"}, "message": "missing"}], "errors": []}"#,
                "",
            )
            .on("checkov", Scripted::NotFound);
        let config = Config::default();
        let report = StaticChecker::new(&runner, &config)
            .analyze(dir.path())
            .report()
            .cloned()
            .unwrap();
        assert_eq!(report.terraform_files_found, 1);
        assert_eq!(report.results.checkov.status_name(), "not_found");
        assert_eq!(report.summary.linting_issues, 1);
        assert_eq!(report.summary.overall_status, OverallStatus::NeedsAttention);
        assert_eq!(runner.calls().len(), 4);
    }

    #[test]
    fn analysis_report_round_trips() {
        let r = results(valid(0, 1), lint(1), scan(&["HIGH"]));
        let report = AnalysisReport {
            terraform_directory: "infra".into(),
            terraform_files_found: 2,
            analysis_timestamp: "2024-01-01T00:00:00+00:00".into(),
            summary: StaticSummary::from_results(&r),
            results: r,
        };
        let outcome = PhaseOutcome::Success(report);
        let json = serde_json::to_string_pretty(&outcome).unwrap();
        let back: PhaseOutcome<AnalysisReport> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }
}
