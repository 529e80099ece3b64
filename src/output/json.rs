use crate::error::Result;
use crate::RunReport;

/// Render a run report as pretty-printed JSON.
pub fn render(report: &RunReport) -> Result<String> {
    let json = serde_json::to_string_pretty(report)?;
    Ok(json)
}
