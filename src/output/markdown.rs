//! Markdown summary, suitable as a pull request comment.

use crate::ir::{OverallStatus, PhaseOutcome};
use crate::RunReport;

fn status_marker(status: OverallStatus) -> &'static str {
    match status {
        OverallStatus::Passed => "✅",
        OverallStatus::NeedsAttention => "⚠️",
        _ => "❌",
    }
}

pub fn render(report: &RunReport) -> String {
    let mut out = String::new();
    let status = report.summary.overall_status;

    out.push_str("## IaC Harness Results\n\n");
    out.push_str(&format!(
        "**Overall Status:** {} {}\n\n",
        status_marker(status),
        status
    ));
    out.push_str(&format!("**Directory:** `{}`\n\n", report.terraform_directory));

    if let Some(outcome) = &report.static_analysis {
        out.push_str("### Static Analysis\n");
        match outcome {
            PhaseOutcome::Success(r) => {
                let s = &r.summary;
                out.push_str(&format!("- **Status:** {}\n", s.overall_status));
                out.push_str(&format!("- **Issues Found:** {}\n", s.total_issues));
                out.push_str(&format!("- **Critical Issues:** {}\n", s.critical_issues));
                out.push_str(&format!(
                    "- **Validation:** {}\n",
                    if s.validation_passed { "Passed" } else { "Failed" }
                ));
                out.push_str(&format!(
                    "- **Tools:** terraform validate `{}`, tflint `{}`, checkov `{}`\n\n",
                    r.results.terraform_validate.status_name(),
                    r.results.tflint.status_name(),
                    r.results.checkov.status_name()
                ));
            }
            PhaseOutcome::Error { error_message } => {
                out.push_str(&format!("- **Status:** error ({})\n\n", error_message));
            }
        }
    }

    if let Some(outcome) = &report.policy_compliance {
        out.push_str("### Policy Compliance\n");
        match outcome {
            PhaseOutcome::Success(c) => {
                out.push_str(&format!("- **Status:** {}\n", c.overall_status));
                out.push_str(&format!("- **Policies Checked:** {}\n", c.total_policies));
                out.push_str(&format!("- **Passed:** {}\n", c.passed_policies));
                out.push_str(&format!("- **Failed:** {}\n", c.failed_policies));
                out.push_str(&format!("- **Compliance Score:** {:.1}%\n\n", c.compliance_score));

                let failed: Vec<_> = c.results.iter().filter(|r| r.violation_count > 0).collect();
                if !failed.is_empty() {
                    out.push_str("| Policy | Violations |\n|---|---|\n");
                    for result in failed {
                        out.push_str(&format!(
                            "| {} | {} |\n",
                            escape_cell(&result.policy_name),
                            result.violation_count
                        ));
                    }
                    out.push('\n');
                }
            }
            PhaseOutcome::Error { error_message } => {
                out.push_str(&format!("- **Status:** error ({})\n\n", error_message));
            }
        }
    }

    if let Some(dynamic) = &report.dynamic_testing {
        out.push_str("### Dynamic Testing\n");
        out.push_str(&format!("- **Environment:** {}\n", dynamic.environment));
        out.push_str(&format!("- **Status:** {}\n", dynamic.summary.overall_status));
        out.push_str(&format!("- **Tests Run:** {}\n", dynamic.summary.total_tests));
        out.push_str(&format!("- **Passed:** {}\n", dynamic.summary.tests_passed));
        out.push_str(&format!("- **Failed:** {}\n", dynamic.summary.tests_failed));
        if let Some(message) = dynamic.deployment.error_message() {
            out.push_str(&format!("- **Deployment:** failed ({})\n", message));
        }
        out.push('\n');
    }

    out.push_str("### Recommendations\n");
    if status.is_passed() {
        out.push_str("- Infrastructure looks good for deployment\n");
        out.push_str("- Consider reviewing any warnings for best practices\n");
    } else {
        out.push_str("- Review and fix the identified issues before deploying\n");
        out.push_str("- Check the detailed logs for specific error messages\n");
        out.push_str("- Ensure all security policies are met\n");
    }

    out.push_str(&format!(
        "\n---\n*{}/{} checks passed. Generated by iac-harness at {}*\n",
        report.summary.passed_checks, report.summary.total_checks, report.analysis_timestamp
    ));
    out
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|")
}
