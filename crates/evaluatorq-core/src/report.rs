use std::fmt::Write as _;

use crate::{DataPointResult, EvaluatorScore, JobResult, RunOutcome, RunReport};

/// Render a finished run as a self-contained HTML page.
pub fn generate_html_report(report: &RunReport) -> String {
    let mut rows = String::new();
    for (row, dpr) in report.results.iter().enumerate() {
        rows.push_str(&data_point_rows(row, dpr));
    }

    let mut evaluator_rows = String::new();
    for stats in &report.summary.evaluators {
        let pass_rate = if stats.total_with_pass == 0 {
            "-".to_string()
        } else {
            format!("{:.1}%", stats.passed as f64 * 100.0 / stats.total_with_pass as f64)
        };
        let _ = write!(
            evaluator_rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            html_escape(&stats.job_name),
            html_escape(&stats.evaluator_name),
            stats.count,
            stats.errors,
            stats.mean.map(|m| format!("{m:.3}")).unwrap_or_else(|| "-".to_string()),
            pass_rate
        );
    }

    let summary = &report.summary;
    let (outcome_label, outcome_class) = match report.outcome() {
        RunOutcome::Passed => ("PASSED", "good"),
        RunOutcome::Failed => ("FAILED", "bad"),
    };
    let pass_rate = summary
        .pass_rate
        .map(|r| format!("{:.1}%", r * 100.0))
        .unwrap_or_else(|| "-".to_string());
    let description = report
        .description
        .as_deref()
        .map(|d| format!("<p class=\"description\">{}</p>", html_escape(d)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title} · evaluatorq</title>
<style>
body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 24px; background: #f4f5f7; color: #222; }}
main {{ max-width: 1400px; margin: 0 auto; background: #fff; padding: 28px; border-radius: 8px; }}
.meta, .description {{ color: #666; font-size: 14px; }}
.cards {{ display: flex; gap: 16px; margin: 20px 0; }}
.card {{ flex: 1; padding: 14px; background: #f8f9fa; border-radius: 6px; }}
.card .label {{ font-size: 11px; text-transform: uppercase; color: #777; }}
.card .value {{ font-size: 26px; font-weight: 600; }}
.good {{ color: #1e7e34; }}
.bad {{ color: #c82333; }}
table {{ width: 100%; border-collapse: collapse; margin-top: 16px; font-size: 13px; }}
th {{ background: #343a40; color: #fff; text-align: left; padding: 10px; }}
td {{ padding: 10px; border-bottom: 1px solid #e3e6ea; vertical-align: top; }}
tr.error td {{ background: #fdf1f1; }}
pre {{ margin: 0; padding: 6px; background: #f8f9fa; border-radius: 4px; max-height: 160px; overflow: auto; white-space: pre-wrap; word-break: break-word; }}
.badge {{ display: inline-block; margin: 2px; padding: 3px 7px; border-radius: 4px; font-size: 11px; font-weight: 600; background: #e9ecef; }}
.badge.pass {{ background: #d4edda; color: #155724; }}
.badge.fail, .badge.err {{ background: #f8d7da; color: #721c24; }}
</style>
</head>
<body>
<main>
<h1>{title}</h1>
{description}
<div class="meta">Generated {generated} · {duration} ms</div>
<div class="cards">
  <div class="card"><div class="label">Outcome</div><div class="value {outcome_class}">{outcome_label}</div></div>
  <div class="card"><div class="label">Data points</div><div class="value">{total_dp}</div></div>
  <div class="card"><div class="label">Failed data points</div><div class="value">{failed_dp}</div></div>
  <div class="card"><div class="label">Failed jobs</div><div class="value">{failed_jobs} / {total_jobs}</div></div>
  <div class="card"><div class="label">Pass rate</div><div class="value">{pass_rate}</div></div>
</div>
<h2>Evaluators</h2>
<table>
<thead><tr><th>Job</th><th>Evaluator</th><th>Count</th><th>Errors</th><th>Mean</th><th>Pass rate</th></tr></thead>
<tbody>{evaluator_rows}</tbody>
</table>
<h2>Results</h2>
<table>
<thead><tr><th>#</th><th>Inputs</th><th>Expected</th><th>Job</th><th>Output</th><th>Scores</th></tr></thead>
<tbody>{rows}</tbody>
</table>
</main>
</body>
</html>"#,
        title = html_escape(&report.name),
        description = description,
        generated = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        duration = report.duration_ms,
        outcome_class = outcome_class,
        outcome_label = outcome_label,
        total_dp = summary.total_data_points,
        failed_dp = summary.failed_data_points,
        failed_jobs = summary.failed_jobs,
        total_jobs = summary.total_jobs,
        pass_rate = pass_rate,
        evaluator_rows = evaluator_rows,
        rows = rows,
    )
}

fn data_point_rows(row: usize, dpr: &DataPointResult) -> String {
    let inputs = pretty(&serde_json::Value::Object(dpr.data_point.inputs.clone()));
    let expected = dpr.data_point.expected_output.as_ref().map(pretty).unwrap_or_default();

    let Some(job_results) = &dpr.job_results else {
        return format!(
            "<tr class=\"error\"><td>{row}</td><td colspan=\"5\">data point failed: {}</td></tr>",
            html_escape(dpr.error.as_deref().unwrap_or_default())
        );
    };

    let mut html = String::new();
    for (i, jr) in job_results.iter().enumerate() {
        let lead = if i == 0 {
            let span = job_results.len().max(1);
            format!(
                "<td rowspan=\"{span}\">{row}</td><td rowspan=\"{span}\"><pre>{}</pre></td><td rowspan=\"{span}\"><pre>{}</pre></td>",
                html_escape(&inputs),
                html_escape(&expected)
            )
        } else {
            String::new()
        };
        let class = if jr.error.is_some() { " class=\"error\"" } else { "" };
        let _ = write!(
            html,
            "<tr{class}>{lead}<td>{}</td><td>{}</td><td>{}</td></tr>",
            html_escape(&jr.job_name),
            job_output(jr),
            jr.evaluator_scores.iter().flatten().map(score_badge).collect::<String>()
        );
    }
    html
}

fn job_output(jr: &JobResult) -> String {
    match &jr.error {
        Some(err) => format!("<span class=\"badge err\">error</span> {}", html_escape(err)),
        None => format!("<pre>{}</pre>", html_escape(&pretty(&jr.output))),
    }
}

fn score_badge(score: &EvaluatorScore) -> String {
    let name = html_escape(&score.evaluator_name);
    if let Some(err) = &score.error {
        return format!("<span class=\"badge err\" title=\"{}\">{name}: error</span>", html_escape(err));
    }
    let class = match score.score.pass {
        Some(true) => "pass",
        Some(false) => "fail",
        None => "",
    };
    let title = score.score.explanation.as_deref().map(html_escape).unwrap_or_default();
    format!(
        "<span class=\"badge {class}\" title=\"{title}\">{name}: {}</span>",
        html_escape(&score.score.value.to_string())
    )
}

fn pretty(v: &serde_json::Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_default()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
