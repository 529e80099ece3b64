use crate::analysis::AnalysisReport;
use crate::dynamic::runtime::TestStatus;
use crate::dynamic::DynamicReport;
use crate::ir::{PhaseOutcome, Severity};
use crate::policy::compliance::ComplianceReport;
use crate::policy::evaluate::PolicyStatus;
use crate::tools::ToolOutcome;
use crate::RunReport;

/// Render a run report as console text, one section per phase that ran.
pub fn render(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("\n  Terraform directory: {}\n", report.terraform_directory));

    if let Some(outcome) = &report.static_analysis {
        render_phase(&mut output, "Static analysis", outcome, render_static);
    }
    if let Some(outcome) = &report.policy_compliance {
        render_phase(&mut output, "Policy compliance", outcome, render_compliance);
    }
    if let Some(dynamic) = &report.dynamic_testing {
        output.push_str("\n  Dynamic testing\n");
        render_dynamic(&mut output, dynamic);
    }

    let summary = &report.summary;
    output.push_str(&format!(
        "\n  Result: {} ({}/{} checks passed, {:.1}%, {:.2}s)\n\n",
        summary.overall_status,
        summary.passed_checks,
        summary.total_checks,
        summary.success_rate,
        report.execution_time,
    ));

    output
}

fn render_phase<T>(
    output: &mut String,
    title: &str,
    outcome: &PhaseOutcome<T>,
    body: impl Fn(&mut String, &T),
) {
    output.push_str(&format!("\n  {}\n", title));
    match outcome {
        PhaseOutcome::Success(report) => body(output, report),
        PhaseOutcome::Error { error_message } => {
            output.push_str(&format!("    [ERROR] {}\n", error_message));
        }
    }
}

fn tool_line<T>(name: &str, outcome: &ToolOutcome<T>, detail: impl Fn(&T) -> String) -> String {
    match outcome {
        ToolOutcome::Success(report) => format!("    {:<20} {}\n", name, detail(report)),
        other => format!(
            "    {:<20} {}: {}\n",
            name,
            other.status_name(),
            other.error_message().unwrap_or_default()
        ),
    }
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "[CRITICAL]",
        Severity::High => "[HIGH]    ",
        Severity::Medium => "[MEDIUM]  ",
        Severity::Low => "[LOW]     ",
    }
}

fn render_static(output: &mut String, report: &AnalysisReport) {
    let results = &report.results;
    output.push_str(&format!("    files scanned: {}\n", report.terraform_files_found));
    output.push_str(&tool_line("terraform validate", &results.terraform_validate, |v| {
        format!(
            "{} ({} errors, {} warnings)",
            if v.valid { "valid" } else { "invalid" },
            v.error_count,
            v.warning_count
        )
    }));
    output.push_str(&tool_line("tflint", &results.tflint, |l| {
        format!("{} issue(s)", l.total_issues)
    }));
    output.push_str(&tool_line("checkov", &results.checkov, |c| {
        format!("{} failed / {} checks", c.failed_checks, c.total_checks)
    }));

    if let Some(scan) = results.checkov.report() {
        let mut failed: Vec<_> = scan.results.failed.iter().collect();
        failed.sort_by(|a, b| b.severity().cmp(&a.severity()).then_with(|| a.file_path.cmp(&b.file_path)));
        for check in failed {
            output.push_str(&format!(
                "      {} {} {}\n",
                severity_tag(check.severity()),
                check.check_id,
                check.check_name
            ));
            let location = match check.line() {
                Some(line) => format!("{}:{}", check.file_path, line),
                None => check.file_path.clone(),
            };
            output.push_str(&format!("                 {} at {}\n", check.resource, location));
        }
    }

    let summary = &report.summary;
    output.push_str(&format!(
        "    issues: {} total, {} critical  status: {}\n",
        summary.total_issues, summary.critical_issues, summary.overall_status
    ));
}

fn render_compliance(output: &mut String, report: &ComplianceReport) {
    output.push_str(&format!(
        "    resources: {}  policies: {} passed / {} total  score: {:.1}%\n",
        report.resources_found, report.passed_policies, report.total_policies, report.compliance_score
    ));
    for result in &report.results {
        let tag = match result.status {
            PolicyStatus::Passed => "[PASS]",
            PolicyStatus::Failed => "[FAIL]",
        };
        output.push_str(&format!(
            "      {} {} ({} applicable)\n",
            tag, result.policy_name, result.applicable_resources
        ));
        for violation in &result.violations {
            output.push_str(&format!("             {}: {}\n", violation.resource, violation.rule));
        }
    }
    if let Some(engine) = &report.policy_engine {
        output.push_str(&tool_line("opa", engine, |r| {
            format!("{} violation(s)", r.violations.len())
        }));
    }
}

fn render_dynamic(output: &mut String, report: &DynamicReport) {
    output.push_str(&format!("    environment: {}\n", report.environment));
    match &report.deployment {
        PhaseOutcome::Success(d) => output.push_str(&format!(
            "    deployed {} resource(s) in {:.1}s\n",
            d.resources_created.len(),
            d.deployment_time
        )),
        PhaseOutcome::Error { error_message } => {
            output.push_str(&format!("    [ERROR] deployment: {}\n", error_message));
        }
    }
    match &report.runtime_tests {
        Some(PhaseOutcome::Success(runtime)) => {
            for case in &runtime.test_results {
                let tag = match case.status {
                    TestStatus::Passed => "[PASS] ",
                    TestStatus::Failed => "[FAIL] ",
                    TestStatus::Warning => "[WARN] ",
                    TestStatus::Error => "[ERROR]",
                };
                output.push_str(&format!("      {} {}: {}\n", tag, case.test_name, case.message));
            }
        }
        Some(PhaseOutcome::Error { error_message }) => {
            output.push_str(&format!("    [ERROR] runtime tests: {}\n", error_message));
        }
        None => {}
    }
    if let Some(PhaseOutcome::Error { error_message }) = &report.cleanup {
        output.push_str(&format!("    [ERROR] cleanup: {}\n", error_message));
    }
    output.push_str(&format!(
        "    runtime: {} ({}/{} passed)\n",
        report.summary.overall_status, report.summary.tests_passed, report.summary.total_tests
    ));
}
