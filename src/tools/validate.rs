use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{failure_message, SourceRange, ToolKind, ToolOutcome};
use crate::config::Config;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

/// Normalised `terraform validate -json` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateReport {
    pub valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub range: Option<SourceRange>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity.eq_ignore_ascii_case("error")
    }
}

#[derive(Deserialize)]
struct RawValidate {
    #[serde(default = "default_valid")]
    valid: bool,
    #[serde(default)]
    error_count: usize,
    #[serde(default)]
    warning_count: usize,
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
}

fn default_valid() -> bool {
    true
}

/// Run `terraform init -backend=false` followed by `terraform validate -json`.
pub fn run(runner: &dyn CommandRunner, dir: &Path, config: &Config) -> ToolOutcome<ValidateReport> {
    let init = CommandSpec::new(&config.tools.terraform, config.timeouts.init())
        .args(["init", "-backend=false", "-input=false", "-no-color"])
        .current_dir(dir);
    match runner.run(&init) {
        Ok(output) if !output.success() => {
            // validate still reports the root cause (missing providers, bad syntax)
            tracing::warn!(
                dir = %dir.display(),
                error = %failure_message(&output),
                "terraform init failed"
            );
        }
        Ok(_) => {}
        Err(e) => return ToolOutcome::from_error(ToolKind::TerraformValidate, e),
    }

    let validate = CommandSpec::new(&config.tools.terraform, config.timeouts.validate())
        .args(["validate", "-json", "-no-color"])
        .current_dir(dir);
    match runner.run(&validate) {
        Ok(output) => normalize(&output),
        Err(e) => ToolOutcome::from_error(ToolKind::TerraformValidate, e),
    }
}

/// Normalise validate output.
///
/// `terraform validate -json` exits 1 for invalid configurations while still
/// printing its JSON verdict, so parseable stdout wins over the exit code.
pub fn normalize(output: &CommandOutput) -> ToolOutcome<ValidateReport> {
    let stdout = output.stdout.trim();
    if stdout.is_empty() {
        return if output.success() {
            ToolOutcome::Success(ValidateReport {
                valid: true,
                error_count: 0,
                warning_count: 0,
                diagnostics: Vec::new(),
            })
        } else {
            ToolOutcome::Error {
                error_message: failure_message(output),
            }
        };
    }

    match serde_json::from_str::<RawValidate>(stdout) {
        Ok(raw) => ToolOutcome::Success(ValidateReport {
            valid: raw.valid,
            error_count: raw.error_count,
            warning_count: raw.warning_count,
            diagnostics: raw.diagnostics,
        }),
        Err(e) if output.success() => ToolOutcome::ParseError {
            error_message: format!("Failed to parse terraform validate JSON output: {}", e),
        },
        Err(_) => ToolOutcome::Error {
            error_message: failure_message(output),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{Scripted, ScriptedRunner};

    const INVALID: &str = r#"{
  "format_version": "1.0",
  "valid": false,
  "error_count": 1,
  "warning_count": 0,
  "diagnostics": [
    {
      "severity": "error",
      "summary": "Unsupported argument",
      "detail": "An argument named \"bucket_name\" is not expected here.",
      "range": {
        "filename": "main.tf",
        "start": {"line": 4, "column": 3, "byte": 60},
        "end": {"line": 4, "column": 14, "byte": 71}
      }
    }
  ]
}"#;

    fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn invalid_config_with_exit_one_is_still_parsed() {
        let outcome = normalize(&output(1, INVALID, ""));
        let report = outcome.report().expect("parsed");
        assert!(!report.valid);
        assert_eq!(report.error_count, 1);
        assert!(report.diagnostics[0].is_error());
        let range = report.diagnostics[0].range.as_ref().unwrap();
        assert_eq!(range.filename, "main.tf");
        assert_eq!(range.start.line, 4);
    }

    #[test]
    fn empty_stdout_success_is_valid() {
        let report = normalize(&output(0, "", "")).report().cloned().unwrap();
        assert!(report.valid);
        assert_eq!(report.error_count, 0);
    }

    #[test]
    fn failure_without_json_is_error_with_stderr() {
        let outcome = normalize(&output(1, "", "Error: Terraform not initialized"));
        assert_eq!(outcome.status_name(), "error");
        assert_eq!(outcome.error_message(), Some("Error: Terraform not initialized"));
    }

    #[test]
    fn garbage_on_success_is_parse_error() {
        let outcome = normalize(&output(0, "Success! The configuration is valid.", ""));
        assert_eq!(outcome.status_name(), "parse_error");
    }

    #[test]
    fn runs_init_then_validate_in_target_dir() {
        let runner = ScriptedRunner::new()
            .exit("terraform init", 1, "", "provider registry unreachable")
            .ok("terraform validate", r#"{"valid": true, "error_count": 0, "warning_count": 1, "diagnostics": []}"#);
        let outcome = run(&runner, Path::new("."), &Config::default());
        let report = outcome.report().unwrap();
        assert!(report.valid);
        assert_eq!(report.warning_count, 1);
        let calls = runner.calls();
        assert!(calls[0].starts_with("terraform init -backend=false"));
        assert!(calls[1].starts_with("terraform validate -json"));
    }

    #[test]
    fn missing_terraform_is_not_found() {
        let runner = ScriptedRunner::new().on("terraform", Scripted::NotFound);
        let outcome = run(&runner, Path::new("."), &Config::default());
        assert_eq!(outcome.status_name(), "not_found");
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn validate_timeout_is_reported() {
        let runner = ScriptedRunner::new()
            .ok("terraform init", "")
            .on("terraform validate", Scripted::Timeout);
        let outcome = run(&runner, Path::new("."), &Config::default());
        assert_eq!(outcome.status_name(), "timeout");
    }
}
