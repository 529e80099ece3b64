use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No Terraform files found in {0}")]
    NoTerraformFiles(String),

    #[error("{tool} not found: {message}")]
    ToolUnavailable { tool: String, message: String },

    #[error("{tool} timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error("Unreadable output from {tool}: {message}")]
    ToolOutput { tool: String, message: String },

    #[error("Provisioning failed at {step}: {message}")]
    Provisioning { step: String, message: String },

    #[error("Runtime check {check} failed: {message}")]
    RuntimeCheck { check: String, message: String },

    #[error("Output error: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HarnessError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}
