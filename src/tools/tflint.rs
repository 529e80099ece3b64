use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{failure_message, SourceRange, ToolKind, ToolOutcome};
use crate::config::Config;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

/// Normalised `tflint --format=json` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintReport {
    pub total_issues: usize,
    pub issues: Vec<LintIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    #[serde(default)]
    pub rule: LintRule,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub range: Option<SourceRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintRule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Deserialize)]
struct RawLint {
    #[serde(default)]
    issues: Vec<LintIssue>,
    #[serde(default)]
    errors: Vec<RawLintError>,
}

#[derive(Deserialize)]
struct RawLintError {
    #[serde(default)]
    message: String,
}

pub fn run(runner: &dyn CommandRunner, dir: &Path, config: &Config) -> ToolOutcome<LintReport> {
    let spec = CommandSpec::new(&config.tools.tflint, config.timeouts.tflint())
        .arg("--format=json")
        .arg("--chdir")
        .arg(dir.display().to_string());
    match runner.run(&spec) {
        Ok(output) => normalize(&output),
        Err(e) => ToolOutcome::from_error(ToolKind::Tflint, e),
    }
}

/// Normalise tflint output.
///
/// tflint exits 2 when it found issues, so the exit code alone says nothing;
/// a populated `errors` array means the lint run itself failed.
pub fn normalize(output: &CommandOutput) -> ToolOutcome<LintReport> {
    let stdout = output.stdout.trim();
    if stdout.is_empty() {
        return if output.success() {
            ToolOutcome::Success(LintReport {
                total_issues: 0,
                issues: Vec::new(),
            })
        } else {
            ToolOutcome::Error {
                error_message: failure_message(output),
            }
        };
    }

    let raw = match serde_json::from_str::<RawLint>(stdout) {
        Ok(raw) => raw,
        Err(e) if output.success() => {
            return ToolOutcome::ParseError {
                error_message: format!("Failed to parse TFLint JSON output: {}", e),
            }
        }
        Err(_) => {
            return ToolOutcome::Error {
                error_message: failure_message(output),
            }
        }
    };

    if !raw.errors.is_empty() {
        let messages: Vec<&str> = raw.errors.iter().map(|e| e.message.as_str()).collect();
        return ToolOutcome::Error {
            error_message: messages.join("; "),
        };
    }

    ToolOutcome::Success(LintReport {
        total_issues: raw.issues.len(),
        issues: raw.issues,
    })
}
