//! Live provisioning: apply the configuration to a sandbox, run black-box
//! checks against what was created, optionally tear it down again.

pub mod cloud;
pub mod runtime;

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Config, DynamicConfig};
use crate::error::{HarnessError, Result};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::ir::PhaseOutcome;
use crate::tools::failure_message;

use cloud::CloudInspector;
use runtime::{RuntimeReport, RuntimeStatus};

/// Where the infrastructure gets deployed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local AWS emulator.
    #[default]
    Localstack,
    Aws,
}

impl Environment {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "localstack" | "local" => Some(Self::Localstack),
            "aws" => Some(Self::Aws),
            _ => None,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Localstack => write!(f, "localstack"),
            Self::Aws => write!(f, "aws"),
        }
    }
}

/// Variables injected into every provisioning and inspection command.
///
/// LocalStack accepts any credentials; the endpoint override redirects both
/// the Terraform AWS provider and the AWS CLI.
pub fn environment_vars(config: &DynamicConfig) -> Vec<(String, String)> {
    let mut vars = vec![("AWS_DEFAULT_REGION".to_string(), config.region.clone())];
    if config.environment == Environment::Localstack {
        vars.extend([
            ("AWS_ENDPOINT_URL".to_string(), config.endpoint.clone()),
            ("AWS_ACCESS_KEY_ID".to_string(), "test".to_string()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), "test".to_string()),
        ]);
    }
    vars
}

/// A resource recorded in the state after apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub values: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub terraform_directory: String,
    pub deployment_timestamp: String,
    pub environment: Environment,
    /// Seconds from `init` to the end of `apply`.
    pub deployment_time: f64,
    pub resources_created: Vec<DeployedResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cleanup_timestamp: String,
}

/// Pull `values.root_module.resources` out of `terraform show -json`.
pub fn resources_from_state(state: &Value) -> Vec<DeployedResource> {
    state
        .pointer("/values/root_module/resources")
        .and_then(Value::as_array)
        .map(|resources| {
            resources
                .iter()
                .map(|r| DeployedResource {
                    resource_type: str_field(r, "type"),
                    name: str_field(r, "name"),
                    address: str_field(r, "address"),
                    values: r.get("values").cloned().unwrap_or(Value::Null),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Drives the Terraform lifecycle in one working directory.
pub struct Provisioner<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
}

impl<'a> Provisioner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a Config) -> Self {
        Self { runner, config }
    }

    fn terraform(&self, dir: &Path, args: &[&str]) -> CommandSpec {
        CommandSpec::new(&self.config.tools.terraform, self.config.timeouts.provision())
            .args(args.iter().copied())
            .current_dir(dir)
            .envs(&environment_vars(&self.config.dynamic))
    }

    /// Run one lifecycle step; any failure is reported against `step`.
    fn step(&self, dir: &Path, step: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self
            .runner
            .run(&self.terraform(dir, args))
            .map_err(|e| HarnessError::Provisioning {
                step: step.to_string(),
                message: e.to_string(),
            })?;
        if !output.success() {
            return Err(HarnessError::Provisioning {
                step: step.to_string(),
                message: failure_message(&output),
            });
        }
        Ok(output)
    }

    /// `init`, `plan -out=tfplan`, `apply tfplan`, then read back the state.
    /// The first failing step aborts the remaining ones.
    pub fn deploy(&self, dir: &Path) -> PhaseOutcome<DeploymentReport> {
        tracing::info!(
            dir = %dir.display(),
            environment = %self.config.dynamic.environment,
            "deploying infrastructure"
        );
        let started = Instant::now();
        let timestamp = chrono::Utc::now().to_rfc3339();

        let applied = self
            .step(dir, "terraform init", &["init", "-no-color", "-input=false"])
            .and_then(|_| self.step(dir, "terraform plan", &["plan", "-no-color", "-input=false", "-out=tfplan"]))
            .and_then(|_| {
                self.step(
                    dir,
                    "terraform apply",
                    &["apply", "-no-color", "-input=false", "-auto-approve", "tfplan"],
                )
            });
        if let Err(e) = applied {
            tracing::warn!(dir = %dir.display(), error = %e, "deployment failed");
            return PhaseOutcome::error(e.to_string());
        }
        let deployment_time = started.elapsed().as_secs_f64();

        let resources_created = self
            .state(dir)
            .map(|state| resources_from_state(&state))
            .unwrap_or_default();

        PhaseOutcome::Success(DeploymentReport {
            terraform_directory: dir.display().to_string(),
            deployment_timestamp: timestamp,
            environment: self.config.dynamic.environment,
            deployment_time,
            resources_created,
        })
    }

    /// Current state as reported by `terraform show -json`, if readable.
    pub fn state(&self, dir: &Path) -> Option<Value> {
        let output = match self.step(dir, "terraform show", &["show", "-no-color", "-json"]) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot read deployment state");
                return None;
            }
        };
        match serde_json::from_str(output.stdout.trim()) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(error = %e, "could not parse terraform state JSON");
                None
            }
        }
    }

    pub fn cleanup(&self, dir: &Path) -> PhaseOutcome<CleanupReport> {
        tracing::info!(dir = %dir.display(), "destroying infrastructure");
        match self.step(
            dir,
            "terraform destroy",
            &["destroy", "-no-color", "-input=false", "-auto-approve"],
        ) {
            Ok(_) => PhaseOutcome::Success(CleanupReport {
                cleanup_timestamp: chrono::Utc::now().to_rfc3339(),
            }),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cleanup failed, manual cleanup may be required");
                PhaseOutcome::error(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicSummary {
    pub overall_status: RuntimeStatus,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub total_tests: usize,
}

/// Result of the whole provisioning phase.
///
/// `runtime_tests` is absent when deployment failed; `cleanup` is absent
/// when teardown was not requested or deployment never happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicReport {
    pub terraform_directory: String,
    pub analysis_timestamp: String,
    pub environment: Environment,
    pub deployment: PhaseOutcome<DeploymentReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_tests: Option<PhaseOutcome<RuntimeReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<PhaseOutcome<CleanupReport>>,
    pub summary: DynamicSummary,
}

impl DynamicReport {
    pub fn passed(&self) -> bool {
        self.summary.overall_status == RuntimeStatus::Passed
    }
}

/// Deploy, inspect, and (when configured) destroy.
pub struct DynamicTester<'a> {
    provisioner: Provisioner<'a>,
    inspector: &'a dyn CloudInspector,
    destroy: bool,
}

impl<'a> DynamicTester<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        inspector: &'a dyn CloudInspector,
        config: &'a Config,
    ) -> Self {
        Self {
            provisioner: Provisioner::new(runner, config),
            inspector,
            destroy: config.dynamic.destroy,
        }
    }

    pub fn run(&self, dir: &Path) -> DynamicReport {
        let started = chrono::Utc::now().to_rfc3339();
        let deployment = self.provisioner.deploy(dir);

        let (runtime_tests, cleanup) = if deployment.report().is_some() {
            let state = self.provisioner.state(dir);
            let runtime = runtime::run_runtime_tests(self.inspector, state.as_ref());
            let cleanup = self.destroy.then(|| self.provisioner.cleanup(dir));
            (Some(runtime), cleanup)
        } else {
            (None, None)
        };

        let summary = match runtime_tests.as_ref().and_then(PhaseOutcome::report) {
            Some(report) => DynamicSummary {
                overall_status: report.summary.overall_status,
                tests_passed: report.passed_tests,
                tests_failed: report.failed_tests,
                total_tests: report.total_tests,
            },
            None => DynamicSummary {
                overall_status: RuntimeStatus::Failed,
                tests_passed: 0,
                tests_failed: 0,
                total_tests: 0,
            },
        };

        DynamicReport {
            terraform_directory: dir.display().to_string(),
            analysis_timestamp: started,
            environment: self.provisioner.config.dynamic.environment,
            deployment,
            runtime_tests,
            cleanup,
            summary,
        }
    }
}
