//! JUnit XML output renderer.
//!
//! The structure is:
//! - `<testsuites>` - root element with totals
//! - `<testsuite>` - one per phase that ran (`StaticAnalysis`,
//!   `PolicyCompliance`, `RuntimeTests`)
//! - `<testcase>` - one per tool, policy or runtime test
//! - `<failure>` / `<error>` / `<skipped>` - findings, phases that could not
//!   run, and tools that are not installed

use crate::analysis::AnalysisReport;
use crate::dynamic::runtime::TestStatus;
use crate::ir::PhaseOutcome;
use crate::policy::evaluate::PolicyStatus;
use crate::tools::ToolOutcome;
use crate::RunReport;

enum Verdict {
    Pass,
    Failure(String),
    Error(String),
    Skipped(String),
}

struct Case {
    classname: &'static str,
    name: String,
    verdict: Verdict,
}

struct Suite {
    name: &'static str,
    cases: Vec<Case>,
}

impl Suite {
    fn count(&self, pred: impl Fn(&Verdict) -> bool) -> usize {
        self.cases.iter().filter(|c| pred(&c.verdict)).count()
    }
}

fn is_failure(v: &Verdict) -> bool {
    matches!(v, Verdict::Failure(_))
}

fn is_error(v: &Verdict) -> bool {
    matches!(v, Verdict::Error(_))
}

fn is_skipped(v: &Verdict) -> bool {
    matches!(v, Verdict::Skipped(_))
}

fn tool_case<T>(name: &str, outcome: &ToolOutcome<T>, findings: impl Fn(&T) -> Option<String>) -> Case {
    let verdict = match outcome {
        ToolOutcome::Success(report) => match findings(report) {
            Some(message) => Verdict::Failure(message),
            None => Verdict::Pass,
        },
        ToolOutcome::NotFound { error_message } => Verdict::Skipped(error_message.clone()),
        other => Verdict::Error(other.error_message().unwrap_or_default().to_string()),
    };
    Case {
        classname: "static_analysis",
        name: name.to_string(),
        verdict,
    }
}

fn static_cases(report: &AnalysisReport) -> Vec<Case> {
    let results = &report.results;
    vec![
        tool_case("terraform_validation", &results.terraform_validate, |v| {
            (!v.valid || v.error_count > 0).then(|| format!("Validation failed with {} error(s)", v.error_count))
        }),
        tool_case("tflint", &results.tflint, |l| {
            (l.total_issues > 0).then(|| format!("{} linting issue(s)", l.total_issues))
        }),
        tool_case("checkov", &results.checkov, |c| {
            (c.failed_checks > 0).then(|| format!("{} failed security check(s)", c.failed_checks))
        }),
    ]
}

fn phase_error(classname: &'static str, message: &str) -> Vec<Case> {
    vec![Case {
        classname,
        name: classname.to_string(),
        verdict: Verdict::Error(message.to_string()),
    }]
}

fn suites(report: &RunReport) -> Vec<Suite> {
    let mut suites = Vec::new();

    if let Some(outcome) = &report.static_analysis {
        let cases = match outcome {
            PhaseOutcome::Success(r) => static_cases(r),
            PhaseOutcome::Error { error_message } => phase_error("static_analysis", error_message),
        };
        suites.push(Suite {
            name: "StaticAnalysis",
            cases,
        });
    }

    if let Some(outcome) = &report.policy_compliance {
        let cases = match outcome {
            PhaseOutcome::Success(c) => c
                .results
                .iter()
                .map(|r| Case {
                    classname: "policy_compliance",
                    name: r.policy_name.clone(),
                    verdict: match r.status {
                        PolicyStatus::Passed => Verdict::Pass,
                        PolicyStatus::Failed => Verdict::Failure(format!(
                            "Policy violation: {} resource(s)",
                            r.violation_count
                        )),
                    },
                })
                .collect(),
            PhaseOutcome::Error { error_message } => phase_error("policy_compliance", error_message),
        };
        suites.push(Suite {
            name: "PolicyCompliance",
            cases,
        });
    }

    if let Some(dynamic) = &report.dynamic_testing {
        let cases = match dynamic.runtime_tests.as_ref() {
            Some(PhaseOutcome::Success(r)) => r
                .test_results
                .iter()
                .map(|t| Case {
                    classname: "runtime_tests",
                    name: t.test_name.clone(),
                    verdict: match t.status {
                        TestStatus::Passed | TestStatus::Warning => Verdict::Pass,
                        TestStatus::Failed => Verdict::Failure(t.message.clone()),
                        TestStatus::Error => Verdict::Error(t.message.clone()),
                    },
                })
                .collect(),
            Some(PhaseOutcome::Error { error_message }) => phase_error("runtime_tests", error_message),
            None => phase_error(
                "runtime_tests",
                dynamic.deployment.error_message().unwrap_or("Runtime tests did not run"),
            ),
        };
        suites.push(Suite {
            name: "RuntimeTests",
            cases,
        });
    }

    suites
}

/// Renders a run report as a JUnit XML document.
pub fn render(report: &RunReport) -> String {
    let suites = suites(report);
    let mut out = String::new();

    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let tests: usize = suites.iter().map(|s| s.cases.len()).sum();
    let failures: usize = suites.iter().map(|s| s.count(is_failure)).sum();
    let errors: usize = suites.iter().map(|s| s.count(is_error)).sum();
    out.push_str(&format!(
        "<testsuites name=\"iac-harness\" tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\">\n",
        tests, failures, errors, report.execution_time
    ));

    for suite in &suites {
        out.push_str(&format!(
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\">\n",
            suite.name,
            suite.cases.len(),
            suite.count(is_failure),
            suite.count(is_error),
            suite.count(is_skipped)
        ));
        for case in &suite.cases {
            out.push_str(&format!(
                "    <testcase classname=\"{}\" name=\"{}\"",
                case.classname,
                escape_xml(&case.name)
            ));
            match &case.verdict {
                Verdict::Pass => out.push_str(" />\n"),
                Verdict::Failure(message) => out.push_str(&format!(
                    ">\n      <failure message=\"{}\" />\n    </testcase>\n",
                    escape_xml(message)
                )),
                Verdict::Error(message) => out.push_str(&format!(
                    ">\n      <error message=\"{}\" />\n    </testcase>\n",
                    escape_xml(message)
                )),
                Verdict::Skipped(message) => out.push_str(&format!(
                    ">\n      <skipped message=\"{}\" />\n    </testcase>\n",
                    escape_xml(message)
                )),
            }
        }
        out.push_str("  </testsuite>\n");
    }

    out.push_str("</testsuites>\n");
    out
}

/// Escapes special XML characters in a string.
fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
