//! Shared vocabulary for every analysis phase.
//!
//! The extractor produces `Resource`s, the tool normalizers produce
//! `SeverityHistogram`s, and every phase reports an `OverallStatus`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A `resource "TYPE" "NAME" {` declaration found in a definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub file: PathBuf,
    /// `TYPE.NAME`, the address Terraform uses for the block.
    pub address: String,
    /// 1-based line of the declaration header.
    pub line: usize,
}

impl Resource {
    pub fn new(resource_type: &str, name: &str, file: PathBuf, line: usize) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            address: format!("{}.{}", resource_type, name),
            file,
            line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "med" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Classify a severity string reported by an external tool.
    /// Missing or unrecognised values count as medium.
    pub fn classify(reported: Option<&str>) -> Self {
        reported
            .and_then(Self::from_str_lenient)
            .unwrap_or(Self::Medium)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Combined status of a scan.
///
/// Variants are declared from least to most severe so `max()` over a set of
/// statuses yields the one with the highest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Passed,
    NeedsAttention,
    CriticalIssues,
    ValidationFailed,
    ToolError,
}

impl OverallStatus {
    pub fn is_passed(self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::NeedsAttention => write!(f, "NEEDS_ATTENTION"),
            Self::CriticalIssues => write!(f, "CRITICAL_ISSUES"),
            Self::ValidationFailed => write!(f, "VALIDATION_FAILED"),
            Self::ToolError => write!(f, "TOOL_ERROR"),
        }
    }
}

/// Result of one analysis phase: its report, or why the phase could not run.
///
/// A phase that ran and found problems is still `Success`; `Error` is
/// reserved for "could not run" (missing directory, nothing to analyse).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome<T> {
    Success(T),
    Error { error_message: String },
}

impl<T> PhaseOutcome<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error_message: message.into(),
        }
    }

    pub fn report(&self) -> Option<&T> {
        match self {
            Self::Success(report) => Some(report),
            Self::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Error { error_message } => Some(error_message),
        }
    }

    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Error { .. } => "error",
        }
    }
}

/// Finding counts bucketed by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityHistogram {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityHistogram {
    pub fn from_severities<I: IntoIterator<Item = Severity>>(severities: I) -> Self {
        let mut counts = Self::default();
        for severity in severities {
            counts.record(severity);
        }
        counts
    }

    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    /// Critical plus high findings.
    pub fn severe(&self) -> usize {
        self.critical + self.high
    }

    /// Medium plus low findings.
    pub fn minor(&self) -> usize {
        self.medium + self.low
    }

    pub fn total(&self) -> usize {
        self.severe() + self.minor()
    }
}
