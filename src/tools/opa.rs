use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{failure_message, ToolKind, ToolOutcome};
use crate::config::Config;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

/// Result of `opa eval` against a Rego policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEngineReport {
    pub policy_file: String,
    pub query: String,
    /// Every value the query produced, flattened across result expressions.
    pub violations: Vec<Value>,
}

pub fn run(
    runner: &dyn CommandRunner,
    input: &Path,
    policy_file: &Path,
    config: &Config,
) -> ToolOutcome<PolicyEngineReport> {
    let query = config.policy.opa_query.clone();
    let spec = CommandSpec::new(&config.tools.opa, config.timeouts.opa())
        .args(["eval", "--format", "json", "-d"])
        .arg(policy_file.display().to_string())
        .arg("-i")
        .arg(input.display().to_string())
        .arg(query.clone());
    match runner.run(&spec) {
        Ok(output) => normalize(&output, policy_file, &query),
        Err(e) => ToolOutcome::from_error(ToolKind::Opa, e),
    }
}

pub fn normalize(
    output: &CommandOutput,
    policy_file: &Path,
    query: &str,
) -> ToolOutcome<PolicyEngineReport> {
    if !output.success() {
        return ToolOutcome::Error {
            error_message: failure_message(output),
        };
    }

    let document: Value = if output.stdout.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(output.stdout.trim()) {
            Ok(v) => v,
            Err(e) => {
                return ToolOutcome::ParseError {
                    error_message: format!("Failed to parse OPA JSON output: {}", e),
                }
            }
        }
    };

    let violations: Vec<Value> = document
        .get("result")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| r.get("expressions").and_then(Value::as_array))
        .flatten()
        .filter_map(|e| e.get("value"))
        .flat_map(expression_values)
        .collect();

    ToolOutcome::Success(PolicyEngineReport {
        policy_file: policy_file.display().to_string(),
        query: query.to_string(),
        violations,
    })
}

/// A set or array rule yields one violation per element; a defined scalar
/// counts once unless it is `false` or empty.
fn expression_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map.values().cloned().collect(),
        Value::Null | Value::Bool(false) => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;

    #[test]
    fn collects_result_entries() {
        let runner = ScriptedRunner::new().ok(
            "opa eval",
            r#"{"result": [{"expressions": [{"value": ["bucket must be encrypted"], "text": "data.terraform.deny"}]}]}"#,
        );
        let outcome = run(
            &runner,
            Path::new("plan.json"),
            Path::new("deny.rego"),
            &Config::default(),
        );
        let report = outcome.report().unwrap();
        assert_eq!(report.violations, vec![Value::from("bucket must be encrypted")]);
        assert_eq!(report.query, "data.terraform.deny");
        assert!(runner.calls()[0].ends_with("-d deny.rego -i plan.json data.terraform.deny"));
    }

    #[test]
    fn each_deny_message_is_a_violation() {
        let out = CommandOutput {
            code: Some(0),
            stdout: r#"{"result": [{"expressions": [{"value": ["a", "b", "c"], "text": "data.terraform.deny"}]}]}"#.into(),
            stderr: String::new(),
        };
        let outcome = normalize(&out, Path::new("p.rego"), "data.terraform.deny");
        assert_eq!(outcome.report().unwrap().violations.len(), 3);

        let out = CommandOutput {
            code: Some(0),
            stdout: r#"{"result": [{"expressions": [{"value": false}]}]}"#.into(),
            stderr: String::new(),
        };
        assert!(normalize(&out, Path::new("p.rego"), "data.x.allow")
            .report()
            .unwrap()
            .violations
            .is_empty());
    }

    #[test]
    fn undefined_query_has_no_violations() {
        let out = CommandOutput {
            code: Some(0),
            stdout: "{}".into(),
            stderr: String::new(),
        };
        let outcome = normalize(&out, Path::new("p.rego"), "data.x");
        assert!(outcome.report().unwrap().violations.is_empty());
    }

    #[test]
    fn compile_error_is_error() {
        let out = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "1 error occurred: p.rego:3: rego_parse_error".into(),
        };
        let outcome = normalize(&out, Path::new("p.rego"), "data.x");
        assert!(outcome.error_message().unwrap().contains("rego_parse_error"));
    }

    #[test]
    fn missing_binary() {
        let runner = ScriptedRunner::new();
        let outcome = run(&runner, Path::new("."), Path::new("p.rego"), &Config::default());
        assert_eq!(outcome.status_name(), "not_found");
    }
}
