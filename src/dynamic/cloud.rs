//! Read-only view of the deployed cloud account.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::environment_vars;
use crate::config::Config;
use crate::dynamic::Environment;
use crate::error::{HarnessError, Result};
use crate::exec::{CommandRunner, CommandSpec};
use crate::tools::failure_message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vpc {
    pub vpc_id: String,
    #[serde(default)]
    pub cidr_block: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub instance_id: String,
    pub state: InstanceState,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.state.name == "running"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceState {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub ip_permissions: Vec<IpPermission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpPermission {
    #[serde(default)]
    pub from_port: Option<i64>,
    #[serde(default)]
    pub to_port: Option<i64>,
    #[serde(default)]
    pub ip_ranges: Vec<IpRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpRange {
    #[serde(default)]
    pub cidr_ip: String,
}

impl SecurityGroup {
    /// Whether any rule starting at `port` admits `0.0.0.0/0`.
    pub fn opens_to_world(&self, port: i64) -> bool {
        self.ip_permissions.iter().any(|p| {
            p.from_port == Some(port) && p.ip_ranges.iter().any(|r| r.cidr_ip == "0.0.0.0/0")
        })
    }
}

/// Describe-style calls the runtime checks rely on.
pub trait CloudInspector: Send + Sync {
    fn describe_vpcs(&self) -> Result<Vec<Vpc>>;

    /// Instances across every reservation.
    fn describe_instances(&self) -> Result<Vec<Instance>>;

    fn list_buckets(&self) -> Result<Vec<Bucket>>;

    /// `Ok` when the bucket exists and the caller may access it.
    fn head_bucket(&self, name: &str) -> Result<()>;

    fn describe_security_groups(&self) -> Result<Vec<SecurityGroup>>;
}

/// Inspector backed by the `aws` command-line client.
pub struct AwsCliInspector<'a> {
    runner: &'a dyn CommandRunner,
    program: String,
    timeout: Duration,
    env: Vec<(String, String)>,
    endpoint: Option<String>,
    region: String,
}

impl<'a> AwsCliInspector<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &Config) -> Self {
        let endpoint = (config.dynamic.environment == Environment::Localstack)
            .then(|| config.dynamic.endpoint.clone());
        Self {
            runner,
            program: config.tools.aws.clone(),
            timeout: config.timeouts.cloud(),
            env: environment_vars(&config.dynamic),
            endpoint,
            region: config.dynamic.region.clone(),
        }
    }

    fn call(&self, service: &str, operation: &str, extra: &[&str]) -> Result<String> {
        let mut spec = CommandSpec::new(&self.program, self.timeout)
            .args([service, operation])
            .args(extra.iter().copied())
            .args(["--output", "json", "--region"])
            .arg(self.region.clone())
            .envs(&self.env);
        if let Some(endpoint) = &self.endpoint {
            spec = spec.arg("--endpoint-url").arg(endpoint.clone());
        }

        let check = format!("{} {}", service, operation);
        let output = self.runner.run(&spec).map_err(|e| HarnessError::RuntimeCheck {
            check: check.clone(),
            message: e.to_string(),
        })?;
        if !output.success() {
            return Err(HarnessError::RuntimeCheck {
                check,
                message: failure_message(&output),
            });
        }
        Ok(output.stdout)
    }

    fn describe<T: DeserializeOwned>(&self, service: &str, operation: &str) -> Result<T> {
        let stdout = self.call(service, operation, &[])?;
        serde_json::from_str(stdout.trim()).map_err(|e| HarnessError::ToolOutput {
            tool: format!("aws {} {}", service, operation),
            message: e.to_string(),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VpcsPage {
    #[serde(default)]
    vpcs: Vec<Vpc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstancesPage {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BucketsPage {
    #[serde(default)]
    buckets: Vec<Bucket>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroupsPage {
    #[serde(default)]
    security_groups: Vec<SecurityGroup>,
}

impl CloudInspector for AwsCliInspector<'_> {
    fn describe_vpcs(&self) -> Result<Vec<Vpc>> {
        Ok(self.describe::<VpcsPage>("ec2", "describe-vpcs")?.vpcs)
    }

    fn describe_instances(&self) -> Result<Vec<Instance>> {
        let page: InstancesPage = self.describe("ec2", "describe-instances")?;
        Ok(page
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .collect())
    }

    fn list_buckets(&self) -> Result<Vec<Bucket>> {
        Ok(self.describe::<BucketsPage>("s3api", "list-buckets")?.buckets)
    }

    fn head_bucket(&self, name: &str) -> Result<()> {
        self.call("s3api", "head-bucket", &["--bucket", name]).map(|_| ())
    }

    fn describe_security_groups(&self) -> Result<Vec<SecurityGroup>> {
        Ok(self
            .describe::<SecurityGroupsPage>("ec2", "describe-security-groups")?
            .security_groups)
    }
}
