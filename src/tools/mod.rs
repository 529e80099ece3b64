//! Adapters for the external scanners.
//!
//! Each adapter invokes one binary through a `CommandRunner` and normalises
//! its JSON into a typed report wrapped in a `ToolOutcome`.

pub mod checkov;
pub mod opa;
pub mod tflint;
pub mod validate;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::exec::CommandOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    TerraformValidate,
    Tflint,
    Checkov,
    Opa,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TerraformValidate => write!(f, "terraform validate"),
            Self::Tflint => write!(f, "TFLint"),
            Self::Checkov => write!(f, "Checkov"),
            Self::Opa => write!(f, "OPA"),
        }
    }
}

/// Terminal state of one tool invocation.
///
/// Serialises with a `status` tag (`success`, `error`, `timeout`,
/// `not_found`, `parse_error`) next to either the report fields or an
/// `error_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome<T> {
    Success(T),
    Error { error_message: String },
    Timeout { error_message: String },
    NotFound { error_message: String },
    ParseError { error_message: String },
}

impl<T> ToolOutcome<T> {
    /// Map an execution error to the matching terminal state.
    pub fn from_error(tool: ToolKind, err: HarnessError) -> Self {
        match err {
            HarnessError::ToolUnavailable { .. } => Self::NotFound {
                error_message: format!("{} not found. Please install it.", tool),
            },
            HarnessError::ToolTimeout { seconds, .. } => Self::Timeout {
                error_message: format!("{} execution timed out after {}s", tool, seconds),
            },
            HarnessError::ToolOutput { message, .. } => Self::ParseError {
                error_message: message,
            },
            other => Self::Error {
                error_message: other.to_string(),
            },
        }
    }

    pub fn report(&self) -> Option<&T> {
        match self {
            Self::Success(report) => Some(report),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Success, or a tool that is simply not installed.
    pub fn is_success_or_not_found(&self) -> bool {
        matches!(self, Self::Success(_) | Self::NotFound { .. })
    }

    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Error { .. } => "error",
            Self::Timeout { .. } => "timeout",
            Self::NotFound { .. } => "not_found",
            Self::ParseError { .. } => "parse_error",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Error { error_message }
            | Self::Timeout { error_message }
            | Self::NotFound { error_message }
            | Self::ParseError { error_message } => Some(error_message),
        }
    }
}

/// Location span reported by terraform and tflint diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub start: Position,
    #[serde(default)]
    pub end: Position,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub line: usize,
    #[serde(default)]
    pub column: usize,
}

/// Best available explanation for a failed invocation.
pub(crate) fn failure_message(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match output.code {
        Some(code) => format!("exited with code {}", code),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counts {
        issues: usize,
    }

    #[test]
    fn success_serialises_with_status_tag() {
        let outcome: ToolOutcome<Counts> = ToolOutcome::Success(Counts { issues: 2 });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["issues"], 2);
    }

    #[test]
    fn failure_round_trips() {
        let outcome: ToolOutcome<Counts> = ToolOutcome::ParseError {
            error_message: "bad json".into(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"parse_error\""));
        let back: ToolOutcome<Counts> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn execution_errors_map_to_states() {
        let not_found: ToolOutcome<Counts> = ToolOutcome::from_error(
            ToolKind::Tflint,
            HarnessError::ToolUnavailable {
                tool: "tflint".into(),
                message: "missing".into(),
            },
        );
        assert_eq!(not_found.status_name(), "not_found");
        assert!(not_found.is_success_or_not_found());

        let timeout: ToolOutcome<Counts> = ToolOutcome::from_error(
            ToolKind::Checkov,
            HarnessError::ToolTimeout {
                tool: "checkov".into(),
                seconds: 120,
            },
        );
        assert_eq!(timeout.status_name(), "timeout");
        assert!(!timeout.is_success_or_not_found());
        assert!(timeout.error_message().unwrap().contains("120s"));
    }

    #[test]
    fn failure_message_prefers_stderr() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "  boom \n".into(),
        };
        assert_eq!(failure_message(&output), "boom");
        let silent = CommandOutput {
            code: Some(4),
            ..Default::default()
        };
        assert_eq!(failure_message(&silent), "exited with code 4");
    }
}
