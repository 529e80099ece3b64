use crate::error::Result;
use crate::RunReport;

/// Render a run report as YAML, same shape as the JSON report.
pub fn render(report: &RunReport) -> Result<String> {
    Ok(serde_yaml::to_string(report)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_matches_json_shape() {
        let report = crate::output::testing::sample_report();
        let from_yaml: serde_json::Value = serde_yaml::from_str(&render(&report).unwrap()).unwrap();
        assert_eq!(from_yaml["summary"]["overall_status"], "CRITICAL_ISSUES");
        assert_eq!(from_yaml["policy_compliance"]["total_policies"], 3);
    }
}
