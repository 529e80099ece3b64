//! CI/CD integration: environment context, annotations, step outputs, the
//! report bundle and the breaking-change gate.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ir::{OverallStatus, Severity};
use crate::output;
use crate::RunReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiEnvironment {
    GithubActions,
    GitlabCi,
    Jenkins,
    /// Not running under a recognised CI system.
    Local,
}

impl CiEnvironment {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "github_actions" | "github" => Some(Self::GithubActions),
            "gitlab_ci" | "gitlab" => Some(Self::GitlabCi),
            "jenkins" => Some(Self::Jenkins),
            "local" | "none" => Some(Self::Local),
            _ => None,
        }
    }

    /// Identify the CI system from its marker variables.
    pub fn detect(lookup: impl Fn(&str) -> Option<String>) -> Self {
        if lookup("GITHUB_ACTIONS").is_some() {
            Self::GithubActions
        } else if lookup("GITLAB_CI").is_some() {
            Self::GitlabCi
        } else if lookup("JENKINS_URL").is_some() || lookup("BUILD_NUMBER").is_some() {
            Self::Jenkins
        } else {
            Self::Local
        }
    }

    /// Context key and the variable it is read from.
    fn context_vars(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::GithubActions => &[
                ("repository", "GITHUB_REPOSITORY"),
                ("ref", "GITHUB_REF"),
                ("sha", "GITHUB_SHA"),
                ("actor", "GITHUB_ACTOR"),
                ("workflow", "GITHUB_WORKFLOW"),
                ("run_id", "GITHUB_RUN_ID"),
                ("run_number", "GITHUB_RUN_NUMBER"),
            ],
            Self::GitlabCi => &[
                ("project_id", "CI_PROJECT_ID"),
                ("pipeline_id", "CI_PIPELINE_ID"),
                ("commit_sha", "CI_COMMIT_SHA"),
                ("ref_name", "CI_COMMIT_REF_NAME"),
                ("job_name", "CI_JOB_NAME"),
            ],
            Self::Jenkins => &[
                ("build_number", "BUILD_NUMBER"),
                ("build_id", "BUILD_ID"),
                ("job_name", "JOB_NAME"),
                ("workspace", "WORKSPACE"),
                ("git_commit", "GIT_COMMIT"),
                ("git_branch", "GIT_BRANCH"),
            ],
            Self::Local => &[],
        }
    }
}

impl std::fmt::Display for CiEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GithubActions => write!(f, "github_actions"),
            Self::GitlabCi => write!(f, "gitlab_ci"),
            Self::Jenkins => write!(f, "jenkins"),
            Self::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLevel {
    Error,
    Warning,
    Notice,
}

impl AnnotationLevel {
    fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical | Severity::High => Self::Error,
            Severity::Medium => Self::Warning,
            Severity::Low => Self::Notice,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub level: AnnotationLevel,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl Annotation {
    pub fn new(level: AnnotationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: Option<usize>) -> Self {
        let file = file.into();
        if !file.is_empty() {
            self.file = Some(file);
            self.line = line.filter(|&l| l > 0);
        }
        self
    }
}

/// Paths written by [`CiIntegration::save_reports`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBundle {
    pub json: PathBuf,
    pub junit: PathBuf,
    pub summary: PathBuf,
}

pub struct CiIntegration {
    environment: CiEnvironment,
    context: BTreeMap<String, String>,
    github_output: Option<PathBuf>,
    jenkins_outputs: PathBuf,
}

impl CiIntegration {
    pub fn from_env(environment: CiEnvironment) -> Self {
        Self::with_lookup(environment, |key| std::env::var(key).ok())
    }

    pub fn with_lookup(environment: CiEnvironment, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let context = environment
            .context_vars()
            .iter()
            .map(|(key, var)| (key.to_string(), lookup(var).unwrap_or_default()))
            .collect();
        Self {
            environment,
            context,
            github_output: lookup("GITHUB_OUTPUT").map(PathBuf::from),
            jenkins_outputs: PathBuf::from("ci_outputs.env"),
        }
    }

    /// Where Jenkins step outputs are appended.
    pub fn with_jenkins_outputs(mut self, path: PathBuf) -> Self {
        self.jenkins_outputs = path;
        self
    }

    pub fn environment(&self) -> CiEnvironment {
        self.environment
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Render one annotation in the dialect of the CI system.
    pub fn format_annotation(&self, annotation: &Annotation) -> String {
        if self.environment != CiEnvironment::GithubActions {
            let prefix = match annotation.level {
                AnnotationLevel::Error => "ERROR",
                AnnotationLevel::Warning => "WARNING",
                AnnotationLevel::Notice => "NOTICE",
            };
            return match (&annotation.file, annotation.line) {
                (Some(file), Some(line)) => {
                    format!("{}: {}:{}: {}", prefix, file, line, annotation.message)
                }
                _ => format!("{}: {}", prefix, annotation.message),
            };
        }

        let level = match annotation.level {
            AnnotationLevel::Error => "error",
            AnnotationLevel::Warning => "warning",
            AnnotationLevel::Notice => "notice",
        };
        match (&annotation.file, annotation.line) {
            (Some(file), Some(line)) => format!(
                "::{} file={},line={}::{}",
                level,
                escape_property(file),
                line,
                escape_data(&annotation.message)
            ),
            _ => format!("::{}::{}", level, escape_data(&annotation.message)),
        }
    }

    /// Publish a step output.
    ///
    /// GitHub Actions appends to `$GITHUB_OUTPUT` (or prints the legacy
    /// `::set-output` command), Jenkins appends to an env file; elsewhere the
    /// returned line should be printed.
    pub fn set_output(&self, name: &str, value: &str) -> Result<Option<String>> {
        match self.environment {
            CiEnvironment::GithubActions => match &self.github_output {
                Some(path) => {
                    append_line(path, &format!("{}={}", name, value))?;
                    Ok(None)
                }
                None => Ok(Some(format!("::set-output name={}::{}", name, value))),
            },
            CiEnvironment::Jenkins => {
                append_line(&self.jenkins_outputs, &format!("{}={}", name, value))?;
                Ok(None)
            }
            _ => Ok(Some(format!("Output: {}={}", name, value))),
        }
    }

    /// Write `ci_results.json`, `junit_results.xml` and `summary.md` into `dir`.
    pub fn save_reports(&self, report: &RunReport, dir: &Path) -> Result<ReportBundle> {
        std::fs::create_dir_all(dir)?;
        let bundle = ReportBundle {
            json: dir.join("ci_results.json"),
            junit: dir.join("junit_results.xml"),
            summary: dir.join("summary.md"),
        };
        std::fs::write(&bundle.json, output::json::render(report)?)?;
        std::fs::write(&bundle.junit, output::junit::render(report))?;
        std::fs::write(&bundle.summary, output::markdown::render(report))?;
        tracing::info!(dir = %dir.display(), "CI reports saved");
        Ok(bundle)
    }

    /// Annotations, outputs and the gate verdict for a finished run.
    ///
    /// Returns the lines to print and the process exit code.
    pub fn finalize(&self, report: &RunReport) -> Result<(Vec<String>, i32)> {
        let mut lines: Vec<String> = annotations(report)
            .iter()
            .map(|a| self.format_annotation(a))
            .collect();

        let status = report.summary.overall_status.to_string().to_lowercase();
        lines.extend(self.set_output("test_status", &status)?);
        if let Some(compliance) = report.policy_compliance.as_ref().and_then(|p| p.report()) {
            let score = (compliance.compliance_score as i64).to_string();
            lines.extend(self.set_output("compliance_score", &score)?);
        }

        let exit_code = if is_breaking(report) {
            lines.push(self.format_annotation(&Annotation::new(
                AnnotationLevel::Error,
                "Critical issues found - failing CI build",
            )));
            1
        } else if report.passed() {
            lines.push(self.format_annotation(&Annotation::new(
                AnnotationLevel::Notice,
                "All tests passed successfully!",
            )));
            0
        } else {
            lines.push(self.format_annotation(&Annotation::new(
                AnnotationLevel::Warning,
                "Some tests failed, but no critical issues found",
            )));
            0
        };
        Ok((lines, exit_code))
    }
}

/// Whether the run should fail the pipeline: validation that did not pass
/// (including a validator that never completed), critical/high static
/// findings, or HIGH/CRITICAL policy violations.
pub fn is_breaking(report: &RunReport) -> bool {
    let static_breaks = report
        .static_analysis
        .as_ref()
        .and_then(|s| s.report())
        .is_some_and(|s| {
            !s.summary.validation_passed
                || matches!(
                    s.summary.overall_status,
                    OverallStatus::ValidationFailed | OverallStatus::CriticalIssues
                )
        });

    let policy_breaks = report
        .policy_compliance
        .as_ref()
        .and_then(|p| p.report())
        .is_some_and(|c| c.violations().any(|v| v.severity >= Severity::High));

    static_breaks || policy_breaks
}

/// One annotation per located finding across every phase.
pub fn annotations(report: &RunReport) -> Vec<Annotation> {
    let mut out = Vec::new();

    if let Some(analysis) = report.static_analysis.as_ref().and_then(|s| s.report()) {
        if let Some(validate) = analysis.results.terraform_validate.report() {
            for d in &validate.diagnostics {
                let level = if d.is_error() {
                    AnnotationLevel::Error
                } else {
                    AnnotationLevel::Warning
                };
                let mut a = Annotation::new(level, d.summary.clone());
                if let Some(range) = &d.range {
                    a = a.at(range.filename.clone(), Some(range.start.line));
                }
                out.push(a);
            }
        }
        if let Some(lint) = analysis.results.tflint.report() {
            for issue in &lint.issues {
                let level = if issue.rule.severity.eq_ignore_ascii_case("error") {
                    AnnotationLevel::Error
                } else {
                    AnnotationLevel::Warning
                };
                let mut a = Annotation::new(level, format!("{}: {}", issue.rule.name, issue.message));
                if let Some(range) = &issue.range {
                    a = a.at(range.filename.clone(), Some(range.start.line));
                }
                out.push(a);
            }
        }
        if let Some(scan) = analysis.results.checkov.report() {
            for check in &scan.results.failed {
                out.push(
                    Annotation::new(
                        AnnotationLevel::from_severity(check.severity()),
                        format!("{} {} ({})", check.check_id, check.check_name, check.resource),
                    )
                    .at(check.file_path.trim_start_matches('/'), check.line()),
                );
            }
        }
    }

    if let Some(compliance) = report.policy_compliance.as_ref().and_then(|p| p.report()) {
        for v in compliance.violations() {
            out.push(Annotation::new(
                AnnotationLevel::from_severity(v.severity),
                format!("[{}] {}: {}", v.policy, v.resource, v.rule),
            ));
        }
    }

    out
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Workflow commands end at a newline; encode the characters GitHub reserves.
fn escape_data(s: &str) -> String {
    s.replace('%', "%25").replace('\r', "%0D").replace('\n', "%0A")
}

/// Property values additionally reserve `:` and `,`.
fn escape_property(s: &str) -> String {
    escape_data(s).replace(':', "%3A").replace(',', "%2C")
}
