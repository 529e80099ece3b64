use super::{AccuracyMetrics, EvaluationData, PerformanceMetrics, Stats};

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn pct(v: f64) -> String {
    format!("{:.2}%", v * 100.0)
}

/// Render an evaluation as a self-contained HTML report.
pub fn render(data: &EvaluationData) -> String {
    let configuration_rows: String = data
        .configurations
        .iter()
        .map(|c| {
            let class = match c.recommendation() {
                "Recommended" => "pass",
                "Consider" => "warn",
                _ => "fail",
            };
            format!(
                r#"<tr>
  <td>{name}</td><td>{detection}</td><td>{time:.1}</td><td>{fp}</td>
  <td>{score:.2}</td><td><span class="badge {class}">{recommendation}</span></td>
</tr>"#,
                name = title_case(&c.name),
                detection = pct(c.detection_rate),
                time = c.avg_execution_time,
                fp = pct(c.false_positive_rate),
                score = c.value_score,
                class = class,
                recommendation = c.recommendation(),
            )
        })
        .collect();

    let tool_rows: String = data
        .tools_analysis
        .iter()
        .map(|t| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.1}</td><td>{}</td></tr>\n",
                title_case(&t.name),
                html_escape(&t.purpose),
                pct(t.accuracy),
                t.execution_time,
                pct(t.false_positive_rate)
            )
        })
        .collect();

    let study = &data.comparative_study;
    let scenario_items: String = study
        .test_scenarios
        .iter()
        .map(|s| {
            format!(
                "<li><strong>{}</strong> - Complexity: {}, Files: {}, Resources: {}, Expected Issues: {}</li>\n",
                html_escape(&s.name),
                s.complexity,
                s.terraform_files,
                s.resources,
                s.expected_issues
            )
        })
        .collect();

    let comparison_rows: String = study
        .configuration_comparison
        .iter()
        .map(|(name, c)| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{:.1}</td><td>{}</td><td>{}</td></tr>\n",
                html_escape(&title_case(name)),
                pct(c.detection_rate),
                c.avg_execution_time,
                c.issues_detected,
                c.issues_expected
            )
        })
        .collect();

    let recommendation_items: String = study
        .recommendations
        .iter()
        .map(|r| format!("<li>{}</li>\n", html_escape(r)))
        .collect();

    let measured = [
        data.detection_accuracy.as_ref().map(accuracy_section),
        data.performance_metrics.as_ref().map(performance_section),
    ]
    .into_iter()
    .flatten()
    .collect::<String>();

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>iac-harness Evaluation Report</title>
<style>
  :root {{
    --bg: #0d1117; --fg: #c9d1d9; --border: #30363d; --card: #161b22;
    --muted: #8b949e; --accent: #58a6ff;
    --pass: #3fb950; --warn: #d29922; --fail: #f85149;
  }}
  * {{ margin: 0; padding: 0; box-sizing: border-box; }}
  body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Helvetica, Arial, sans-serif;
    background: var(--bg); color: var(--fg); line-height: 1.5; padding: 2rem; }}
  .container {{ max-width: 1200px; margin: 0 auto; }}
  header {{ padding: 1.5rem; background: var(--card); border: 1px solid var(--border);
    border-radius: 8px; margin-bottom: 1.5rem; }}
  header h1 {{ font-size: 1.4rem; }}
  header p {{ color: var(--muted); font-size: 0.85rem; }}
  section {{ margin-bottom: 1.5rem; }}
  section h2 {{ font-size: 1.1rem; margin-bottom: 0.75rem; color: var(--accent); }}
  section h3 {{ font-size: 0.95rem; margin: 0.75rem 0 0.5rem; }}
  ul {{ margin-left: 1.5rem; }}
  table {{ width: 100%; border-collapse: collapse; background: var(--card);
    border: 1px solid var(--border); border-radius: 8px; overflow: hidden; }}
  th {{ text-align: left; padding: 0.75rem 1rem; border-bottom: 2px solid var(--border);
    font-size: 0.8rem; text-transform: uppercase; color: var(--muted); }}
  td {{ padding: 0.6rem 1rem; border-bottom: 1px solid var(--border); font-size: 0.9rem; }}
  .badge {{ display: inline-block; padding: 0.15rem 0.5rem; border-radius: 4px;
    font-size: 0.75rem; font-weight: 700; color: #000; }}
  .badge.pass {{ background: var(--pass); }}
  .badge.warn {{ background: var(--warn); }}
  .badge.fail {{ background: var(--fail); color: #fff; }}
  footer {{ margin-top: 1.5rem; text-align: center; font-size: 0.8rem; color: var(--muted); }}
</style>
</head>
<body>
<div class="container">
  <header>
    <h1>iac-harness Evaluation Report</h1>
    <p>Generated {timestamp}</p>
  </header>

  {measured}

  <section>
    <h2>Configuration Comparison</h2>
    <table>
      <thead><tr><th>Configuration</th><th>Detection Rate</th><th>Avg Execution Time (s)</th>
        <th>False Positive Rate</th><th>Value Score</th><th>Recommendation</th></tr></thead>
      <tbody>
{configuration_rows}
      </tbody>
    </table>
  </section>

  <section>
    <h2>Tool Analysis</h2>
    <table>
      <thead><tr><th>Tool</th><th>Purpose</th><th>Accuracy</th><th>Execution Time (s)</th>
        <th>False Positive Rate</th></tr></thead>
      <tbody>
{tool_rows}
      </tbody>
    </table>
  </section>

  <section>
    <h2>Comparative Study</h2>
    <h3>Test Scenarios</h3>
    <ul>
{scenario_items}
    </ul>
    <h3>Configuration Performance</h3>
    <table>
      <thead><tr><th>Configuration</th><th>Detection Rate</th><th>Avg Time (s)</th>
        <th>Issues Found</th><th>Issues Expected</th></tr></thead>
      <tbody>
{comparison_rows}
      </tbody>
    </table>
  </section>

  <section>
    <h2>Recommendations</h2>
    <ul>
{recommendation_items}
    </ul>
  </section>

  <footer>iac-harness {version}</footer>
</div>
</body>
</html>"##,
        timestamp = html_escape(&data.timestamp),
        measured = measured,
        configuration_rows = configuration_rows,
        tool_rows = tool_rows,
        scenario_items = scenario_items,
        comparison_rows = comparison_rows,
        recommendation_items = recommendation_items,
        version = env!("CARGO_PKG_VERSION"),
    )
}

fn accuracy_section(m: &AccuracyMetrics) -> String {
    format!(
        r#"<section>
    <h2>Detection Accuracy</h2>
    <table>
      <thead><tr><th>TP</th><th>FP</th><th>TN</th><th>FN</th><th>Precision</th><th>Recall</th><th>F1</th><th>Accuracy</th></tr></thead>
      <tbody><tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.3}</td><td>{}</td></tr></tbody>
    </table>
  </section>
"#,
        m.true_positives,
        m.false_positives,
        m.true_negatives,
        m.false_negatives,
        pct(m.precision),
        pct(m.recall),
        m.f1_score,
        pct(m.accuracy)
    )
}

fn performance_section(p: &PerformanceMetrics) -> String {
    let row = |label: &str, s: &Stats| {
        format!(
            "<tr><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td></tr>\n",
            label, s.mean, s.median, s.std, s.min, s.max
        )
    };
    format!(
        r#"<section>
    <h2>Performance ({} runs)</h2>
    <table>
      <thead><tr><th>Phase</th><th>Mean (s)</th><th>Median</th><th>Std Dev</th><th>Min</th><th>Max</th></tr></thead>
      <tbody>
{}{}{}{}      </tbody>
    </table>
  </section>
"#,
        p.sample_size,
        row("Static analysis", &p.static_analysis),
        row("Compliance checking", &p.compliance_checking),
        row("Dynamic testing", &p.dynamic_testing),
        row("Total", &p.total_execution)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
