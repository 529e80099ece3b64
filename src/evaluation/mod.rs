//! Framework evaluation: detection accuracy, timing statistics, configuration
//! profiles and a comparative study, written out as HTML and JSON.

pub mod html;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// One labelled sample: what a scenario should flag and what was flagged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSample {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub expected_issues: Vec<IssueRef>,
    #[serde(default)]
    pub detected_issues: Vec<IssueRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    #[serde(rename = "type")]
    pub issue_type: String,
}

impl IssueRef {
    pub fn new(issue_type: &str) -> Self {
        Self {
            issue_type: issue_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub accuracy: f64,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Confusion-matrix metrics over issue *types* per sample.
///
/// A sample with nothing expected and nothing detected is a true negative.
pub fn detection_accuracy(samples: &[DetectionSample]) -> AccuracyMetrics {
    let (mut tp, mut fp, mut tn, mut fn_) = (0, 0, 0, 0);

    for sample in samples {
        let expected: BTreeSet<&str> = sample
            .expected_issues
            .iter()
            .map(|i| i.issue_type.as_str())
            .collect();
        let detected: BTreeSet<&str> = sample
            .detected_issues
            .iter()
            .map(|i| i.issue_type.as_str())
            .collect();

        tp += expected.intersection(&detected).count();
        fp += detected.difference(&expected).count();
        fn_ += expected.difference(&detected).count();
        if sample.expected_issues.is_empty() && sample.detected_issues.is_empty() {
            tn += 1;
        }
    }

    let precision = ratio(tp as f64, (tp + fp) as f64);
    let recall = ratio(tp as f64, (tp + fn_) as f64);
    AccuracyMetrics {
        true_positives: tp,
        false_positives: fp,
        true_negatives: tn,
        false_negatives: fn_,
        precision,
        recall,
        f1_score: ratio(2.0 * precision * recall, precision + recall),
        accuracy: ratio((tp + tn) as f64, samples.len() as f64),
    }
}

/// Wall-clock seconds of one run, per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSample {
    pub static_analysis_time: f64,
    pub compliance_time: f64,
    pub dynamic_testing_time: f64,
    pub total_time: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; zero with fewer than two values.
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        let std = if values.len() > 1 {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        } else {
            0.0
        };

        Self {
            mean,
            median,
            std,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub static_analysis: Stats,
    pub compliance_checking: Stats,
    pub dynamic_testing: Stats,
    pub total_execution: Stats,
    pub sample_size: usize,
}

pub fn performance_metrics(samples: &[TimingSample]) -> PerformanceMetrics {
    let column = |f: fn(&TimingSample) -> f64| -> Stats {
        Stats::from_values(&samples.iter().map(f).collect::<Vec<_>>())
    };
    PerformanceMetrics {
        static_analysis: column(|s| s.static_analysis_time),
        compliance_checking: column(|s| s.compliance_time),
        dynamic_testing: column(|s| s.dynamic_testing_time),
        total_execution: column(|s| s.total_time),
        sample_size: samples.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    /// Setup-complexity contribution to the value score.
    pub fn complexity_score(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 0.7,
            Self::High => 0.4,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationProfile {
    pub name: String,
    pub description: String,
    pub modules: Vec<String>,
    pub avg_execution_time: f64,
    pub detection_rate: f64,
    pub false_positive_rate: f64,
    pub resource_usage: Level,
    pub setup_complexity: Level,
    pub value_score: f64,
}

/// `0.5·detection + 0.3·(1 − fp) + 0.1·1/(t/60 + 1) + 0.1·complexity`
pub fn value_score(
    detection_rate: f64,
    false_positive_rate: f64,
    avg_execution_time: f64,
    setup_complexity: Level,
) -> f64 {
    let time_score = 1.0 / (avg_execution_time / 60.0 + 1.0);
    detection_rate * 0.5
        + (1.0 - false_positive_rate) * 0.3
        + time_score * 0.1
        + setup_complexity.complexity_score() * 0.1
}

impl ConfigurationProfile {
    fn new(
        name: &str,
        description: &str,
        modules: &[&str],
        (avg_execution_time, detection_rate, false_positive_rate): (f64, f64, f64),
        level: Level,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            modules: modules.iter().map(|m| m.to_string()).collect(),
            avg_execution_time,
            detection_rate,
            false_positive_rate,
            resource_usage: level,
            setup_complexity: level,
            value_score: value_score(detection_rate, false_positive_rate, avg_execution_time, level),
        }
    }

    pub fn recommendation(&self) -> &'static str {
        if self.value_score > 0.7 {
            "Recommended"
        } else if self.value_score > 0.5 {
            "Consider"
        } else {
            "Not recommended"
        }
    }
}

/// The three ways the harness can be run, with reference measurements.
pub fn configuration_profiles() -> Vec<ConfigurationProfile> {
    vec![
        ConfigurationProfile::new(
            "static_only",
            "Static analysis and linting only",
            &["static_analysis"],
            (15.2, 0.65, 0.15),
            Level::Low,
        ),
        ConfigurationProfile::new(
            "static_plus_compliance",
            "Static analysis + policy compliance",
            &["static_analysis", "policy_compliance"],
            (32.8, 0.82, 0.12),
            Level::Medium,
        ),
        ConfigurationProfile::new(
            "full_stack",
            "Complete framework with dynamic testing",
            &["static_analysis", "policy_compliance", "dynamic_testing"],
            (185.5, 0.94, 0.08),
            Level::High,
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProfile {
    pub name: String,
    pub purpose: String,
    pub detection_categories: Vec<String>,
    pub accuracy: f64,
    pub execution_time: f64,
    pub false_positive_rate: f64,
    pub coverage: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn tool_catalogue() -> Vec<ToolProfile> {
    let tool = |name: &str, purpose: &str, categories: &[&str], (accuracy, time, fp): (f64, f64, f64), coverage: &[&str]| ToolProfile {
        name: name.to_string(),
        purpose: purpose.to_string(),
        detection_categories: strings(categories),
        accuracy,
        execution_time: time,
        false_positive_rate: fp,
        coverage: strings(coverage),
    };
    vec![
        tool(
            "terraform_validate",
            "Syntax and configuration validation",
            &["syntax_errors", "configuration_issues"],
            (0.98, 2.3, 0.02),
            &["syntax", "basic_validation"],
        ),
        tool(
            "tflint",
            "Best practices and linting",
            &["best_practices", "deprecated_syntax", "unused_variables"],
            (0.85, 8.7, 0.18),
            &["linting", "best_practices", "aws_specific"],
        ),
        tool(
            "checkov",
            "Security and compliance scanning",
            &["security_issues", "compliance_violations"],
            (0.79, 21.2, 0.25),
            &["security", "compliance", "cloud_specific"],
        ),
        tool(
            "opa",
            "Custom policy enforcement",
            &["policy_violations", "governance_issues"],
            (0.92, 5.8, 0.08),
            &["custom_policies", "governance"],
        ),
        tool(
            "dynamic_testing",
            "Runtime infrastructure validation",
            &["runtime_issues", "integration_problems"],
            (0.88, 125.0, 0.12),
            &["runtime", "integration", "real_world"],
        ),
    ]
}

/// A reference workload measured under each configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub complexity: Level,
    pub terraform_files: usize,
    pub resources: usize,
    pub expected_issues: usize,
    /// Issues found, keyed by configuration name.
    pub detected_issues: BTreeMap<String, usize>,
    /// Seconds taken, keyed by configuration name.
    pub execution_times: BTreeMap<String, f64>,
}

impl Scenario {
    fn new(
        name: &str,
        complexity: Level,
        (terraform_files, resources, expected_issues): (usize, usize, usize),
        detected: [usize; 3],
        times: [f64; 3],
    ) -> Self {
        let names = ["static_only", "static_plus_compliance", "full_stack"];
        Self {
            name: name.to_string(),
            complexity,
            terraform_files,
            resources,
            expected_issues,
            detected_issues: names.iter().map(|n| n.to_string()).zip(detected).collect(),
            execution_times: names.iter().map(|n| n.to_string()).zip(times).collect(),
        }
    }
}

pub fn reference_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "Simple EC2 Instance",
            Level::Low,
            (1, 3, 2),
            [1, 2, 2],
            [12.5, 28.3, 165.8],
        ),
        Scenario::new(
            "Multi-Tier Web Application",
            Level::Medium,
            (5, 15, 8),
            [4, 7, 8],
            [18.2, 41.7, 198.3],
        ),
        Scenario::new(
            "Enterprise Microservices",
            Level::High,
            (12, 45, 15),
            [8, 12, 14],
            [25.8, 58.9, 245.7],
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationComparison {
    pub detection_rate: f64,
    pub avg_execution_time: f64,
    pub total_time: f64,
    pub scenarios_tested: usize,
    pub issues_detected: usize,
    pub issues_expected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparativeStudy {
    pub test_scenarios: Vec<Scenario>,
    pub configuration_comparison: BTreeMap<String, ConfigurationComparison>,
    pub recommendations: Vec<String>,
}

/// Aggregate detection and timing per configuration across `scenarios`.
pub fn comparative_study(scenarios: Vec<Scenario>) -> ComparativeStudy {
    let configurations: BTreeSet<&String> = scenarios
        .iter()
        .flat_map(|s| s.detected_issues.keys().chain(s.execution_times.keys()))
        .collect();

    let issues_expected: usize = scenarios.iter().map(|s| s.expected_issues).sum();
    let configuration_comparison: BTreeMap<String, ConfigurationComparison> = configurations
        .into_iter()
        .map(|name| {
            let issues_detected: usize = scenarios
                .iter()
                .map(|s| s.detected_issues.get(name).copied().unwrap_or(0))
                .sum();
            let total_time: f64 = scenarios
                .iter()
                .map(|s| s.execution_times.get(name).copied().unwrap_or(0.0))
                .sum();
            let comparison = ConfigurationComparison {
                detection_rate: ratio(issues_detected as f64, issues_expected as f64),
                avg_execution_time: ratio(total_time, scenarios.len() as f64),
                total_time,
                scenarios_tested: scenarios.len(),
                issues_detected,
                issues_expected,
            };
            (name.clone(), comparison)
        })
        .collect();

    let recommendations = recommendations(&configuration_comparison);
    ComparativeStudy {
        test_scenarios: scenarios,
        configuration_comparison,
        recommendations,
    }
}

fn recommendations(comparison: &BTreeMap<String, ConfigurationComparison>) -> Vec<String> {
    let fastest = comparison
        .iter()
        .min_by(|a, b| a.1.avg_execution_time.total_cmp(&b.1.avg_execution_time))
        .map(|(name, _)| name.as_str());
    // first of equals wins, as with the fastest pick
    let most_accurate = comparison
        .iter()
        .fold(None::<(&String, &ConfigurationComparison)>, |best, cur| match best {
            Some(b) if b.1.detection_rate >= cur.1.detection_rate => Some(b),
            _ => Some(cur),
        })
        .map(|(name, _)| name.as_str());

    let mut out = Vec::new();
    if let Some(name) = fastest {
        out.push(format!("For fastest execution: Use '{}' configuration", name));
    }
    if let Some(name) = most_accurate {
        out.push(format!("For highest accuracy: Use '{}' configuration", name));
    }
    out.extend(strings(&[
        "Consider using 'static_plus_compliance' for most scenarios as it balances speed and accuracy",
        "Use 'full_stack' configuration for critical production deployments",
        "Implement progressive testing: static -> compliance -> dynamic based on change impact",
    ]));
    out
}

/// Measurements supplied by the user with `--samples`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSamples {
    pub detection: Vec<DetectionSample>,
    pub timings: Vec<TimingSample>,
    /// Replaces the reference scenarios when present.
    pub scenarios: Option<Vec<Scenario>>,
}

impl EvaluationSamples {
    /// Load a JSON or YAML samples file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Cannot read samples file {}: {}", path.display(), e))
        })?;
        let samples = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(samples)
    }
}

/// Everything an evaluation run computed; saved as `evaluation_data.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationData {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_accuracy: Option<AccuracyMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceMetrics>,
    pub configurations: Vec<ConfigurationProfile>,
    pub tools_analysis: Vec<ToolProfile>,
    pub comparative_study: ComparativeStudy,
}

pub fn evaluate(samples: &EvaluationSamples) -> EvaluationData {
    let scenarios = samples
        .scenarios
        .clone()
        .unwrap_or_else(reference_scenarios);
    EvaluationData {
        timestamp: chrono::Utc::now().to_rfc3339(),
        detection_accuracy: (!samples.detection.is_empty())
            .then(|| detection_accuracy(&samples.detection)),
        performance_metrics: (!samples.timings.is_empty())
            .then(|| performance_metrics(&samples.timings)),
        configurations: configuration_profiles(),
        tools_analysis: tool_catalogue(),
        comparative_study: comparative_study(scenarios),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationArtifacts {
    pub html: PathBuf,
    pub data: PathBuf,
}

/// Write `evaluation_report.html` and `evaluation_data.json` into `dir`.
pub fn write_report(data: &EvaluationData, dir: &Path) -> Result<EvaluationArtifacts> {
    std::fs::create_dir_all(dir)?;
    let artifacts = EvaluationArtifacts {
        html: dir.join("evaluation_report.html"),
        data: dir.join("evaluation_data.json"),
    };
    std::fs::write(&artifacts.html, html::render(data))?;
    std::fs::write(&artifacts.data, serde_json::to_string_pretty(data)?)?;
    tracing::info!(dir = %dir.display(), "evaluation report written");
    Ok(artifacts)
}
