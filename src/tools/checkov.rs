use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{failure_message, ToolKind, ToolOutcome};
use crate::config::Config;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::ir::{Severity, SeverityHistogram};

/// Normalised Checkov result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub failed_checks: usize,
    pub passed_checks: usize,
    pub total_checks: usize,
    /// Failed checks bucketed by reported severity.
    pub summary: SeverityHistogram,
    pub results: CheckResults,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResults {
    pub failed: Vec<Check>,
    pub passed: Vec<Check>,
}

/// One Checkov check against one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    #[serde(default)]
    pub check_id: String,
    #[serde(default)]
    pub check_name: String,
    /// Severity string as reported; open-source Checkov leaves it null.
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub file_line_range: Vec<usize>,
    #[serde(default)]
    pub guideline: Option<String>,
}

impl Check {
    pub fn severity(&self) -> Severity {
        Severity::classify(self.severity.as_deref())
    }

    /// First line of the flagged block, when Checkov reported one.
    pub fn line(&self) -> Option<usize> {
        self.file_line_range.first().copied().filter(|&l| l > 0)
    }
}

pub fn run(runner: &dyn CommandRunner, dir: &Path, config: &Config) -> ToolOutcome<ScanReport> {
    let spec = CommandSpec::new(&config.tools.checkov, config.timeouts.checkov())
        .arg("--directory")
        .arg(dir.display().to_string())
        .args(["--output", "json", "--quiet", "--compact"]);
    match runner.run(&spec) {
        Ok(output) => normalize(&output),
        Err(e) => ToolOutcome::from_error(ToolKind::Checkov, e),
    }
}

/// Normalise Checkov output.
///
/// Checkov exits non-zero whenever a check fails, so only the JSON matters.
/// A single framework prints one object; several print a list of them, in
/// which case the terraform entry (or else the first) is used.
pub fn normalize(output: &CommandOutput) -> ToolOutcome<ScanReport> {
    let stdout = output.stdout.trim();
    if stdout.is_empty() {
        return if output.success() {
            ToolOutcome::Success(build_report(Vec::new(), Vec::new()))
        } else {
            ToolOutcome::Error {
                error_message: failure_message(output),
            }
        };
    }

    let document: Value = match serde_json::from_str(stdout) {
        Ok(v) => v,
        Err(e) => {
            return ToolOutcome::ParseError {
                error_message: format!("Failed to parse Checkov JSON output: {}", e),
            }
        }
    };

    let results = match select_results(&document) {
        Some(results) => results,
        None => return ToolOutcome::Success(build_report(Vec::new(), Vec::new())),
    };

    let failed = match parse_checks(results.get("failed_checks")) {
        Ok(checks) => checks,
        Err(e) => return ToolOutcome::ParseError { error_message: e },
    };
    let passed = match parse_checks(results.get("passed_checks")) {
        Ok(checks) => checks,
        Err(e) => return ToolOutcome::ParseError { error_message: e },
    };

    ToolOutcome::Success(build_report(failed, passed))
}

fn select_results(document: &Value) -> Option<&Value> {
    let results = match document {
        Value::Object(map) => map.get("results")?,
        Value::Array(entries) => pick_entry(entries)?.get("results")?,
        _ => return None,
    };
    match results {
        Value::Array(entries) => pick_entry(entries).map(|e| e.get("results").unwrap_or(e)),
        other => Some(other),
    }
}

/// The terraform entry of a framework list, or else the first one.
fn pick_entry(entries: &[Value]) -> Option<&Value> {
    entries
        .iter()
        .find(|e| e.get("check_type").and_then(Value::as_str) == Some("terraform"))
        .or_else(|| entries.first())
}

fn parse_checks(value: Option<&Value>) -> std::result::Result<Vec<Check>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| format!("Unexpected Checkov check layout: {}", e)),
    }
}

fn build_report(failed: Vec<Check>, passed: Vec<Check>) -> ScanReport {
    let summary = SeverityHistogram::from_severities(failed.iter().map(Check::severity));
    ScanReport {
        failed_checks: failed.len(),
        passed_checks: passed.len(),
        total_checks: failed.len() + passed.len(),
        summary,
        results: CheckResults { failed, passed },
    }
}
