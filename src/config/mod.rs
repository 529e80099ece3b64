use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dynamic::Environment;
use crate::error::Result;

pub const CONFIG_FILE_NAME: &str = ".iac-harness.toml";

/// Top-level configuration from `.iac-harness.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub dynamic: DynamicConfig,
}

/// Names or paths of the external binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub terraform: String,
    pub tflint: String,
    pub checkov: String,
    pub opa: String,
    pub aws: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        let (tflint, checkov) = if cfg!(windows) {
            ("tflint.exe", "checkov.cmd")
        } else {
            ("tflint", "checkov")
        };
        Self {
            terraform: "terraform".into(),
            tflint: tflint.into(),
            checkov: checkov.into(),
            opa: "opa".into(),
            aws: "aws".into(),
        }
    }
}

/// Per-call ceilings, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub init: u64,
    pub validate: u64,
    pub tflint: u64,
    pub checkov: u64,
    pub opa: u64,
    pub provision: u64,
    pub cloud: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            init: 60,
            validate: 30,
            tflint: 60,
            checkov: 120,
            opa: 60,
            provision: 300,
            cloud: 30,
        }
    }
}

impl Timeouts {
    pub fn init(&self) -> Duration {
        Duration::from_secs(self.init)
    }

    pub fn validate(&self) -> Duration {
        Duration::from_secs(self.validate)
    }

    pub fn tflint(&self) -> Duration {
        Duration::from_secs(self.tflint)
    }

    pub fn checkov(&self) -> Duration {
        Duration::from_secs(self.checkov)
    }

    pub fn opa(&self) -> Duration {
        Duration::from_secs(self.opa)
    }

    pub fn provision(&self) -> Duration {
        Duration::from_secs(self.provision)
    }

    pub fn cloud(&self) -> Duration {
        Duration::from_secs(self.cloud)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Directory of YAML/JSON policy files.
    pub dir: PathBuf,
    /// Optional Rego policy evaluated with `opa eval`.
    pub opa_policy: Option<PathBuf>,
    pub opa_query: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("policies"),
            opa_policy: None,
            opa_query: "data.terraform.deny".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    pub environment: Environment,
    pub region: String,
    /// Emulator endpoint, used only for the LocalStack environment.
    pub endpoint: String,
    /// Run `terraform destroy` after the runtime checks.
    pub destroy: bool,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Localstack,
            region: "us-east-1".into(),
            endpoint: "http://localhost:4566".into(),
            destroy: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Explicit path if given, else `.iac-harness.toml` inside the target directory.
    pub fn locate(target_dir: &Path, explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| target_dir.join(CONFIG_FILE_NAME))
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# iac-harness configuration

[tools]
# terraform = "terraform"
# tflint = "tflint"
# checkov = "checkov"
# opa = "opa"
# aws = "aws"

[timeouts]
# Seconds allowed for each external call.
# init = 60
# validate = 30
# tflint = 60
# checkov = 120
# opa = 60
# provision = 300
# cloud = 30

[policy]
# Directory holding YAML/JSON files with a top-level `policies` array.
dir = "policies"
# opa_policy = "policies/terraform.rego"
# opa_query = "data.terraform.deny"

[dynamic]
# "localstack" or "aws".
environment = "localstack"
region = "us-east-1"
endpoint = "http://localhost:4566"
# Tear the deployment down after runtime checks.
destroy = false
"#
    }
}
