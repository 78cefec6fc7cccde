use crate::RunReport;
use anyhow::Result;

/// Fails when any evaluator returned `pass: false`.
///
/// Use this in your `#[tokio::test]` functions.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn answers_stay_correct() -> anyhow::Result<()> {
///     let report = Evaluatorq::builder("answers")
///         .data(points)
///         .job(answer_job)
///         .evaluator(Arc::new(ExactMatchEvaluator))
///         .print(false)
///         .build()?
///         .run()
///         .await?;
///
///     assert_run_passed(&report)?;
///     Ok(())
/// }
/// ```
pub fn assert_run_passed(report: &RunReport) -> Result<()> {
    if report.outcome().is_failed() {
        anyhow::bail!(
            "Run '{}' failed: {}/{} gated scores passed\n{}",
            report.name,
            report.summary.passed,
            report.summary.total_with_pass,
            report.summary.summary_table()
        );
    }
    Ok(())
}

/// Asserts the overall pass rate meets a threshold. Runs without any gated
/// score have no pass rate and are rejected.
pub fn assert_pass_rate(report: &RunReport, min_pass_rate: f64) -> Result<()> {
    let Some(rate) = report.summary.pass_rate else {
        anyhow::bail!("Run '{}' produced no pass/fail scores", report.name);
    };
    if rate < min_pass_rate {
        anyhow::bail!(
            "Run '{}' failed: pass rate {:.1}% is below threshold {:.1}%\n{}",
            report.name,
            rate * 100.0,
            min_pass_rate * 100.0,
            report.summary.summary_table()
        );
    }
    Ok(())
}

/// Asserts no data point, job, or evaluator recorded an error.
pub fn assert_no_errors(report: &RunReport) -> Result<()> {
    let s = &report.summary;
    if s.failed_data_points + s.failed_jobs + s.failed_scores > 0 {
        anyhow::bail!(
            "Run '{}' recorded errors: {} data points, {} jobs, {} evaluators\n{}",
            report.name,
            s.failed_data_points,
            s.failed_jobs,
            s.failed_scores,
            crate::results_table(&report.results)
        );
    }
    Ok(())
}
