use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::{Table, Tabled};

use crate::{DataPointResult, EvaluatorScore};

/// Aggregate counts over one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
	pub total_data_points: usize,
	pub failed_data_points: usize,
	pub total_jobs: usize,
	pub failed_jobs: usize,
	pub total_scores: usize,
	pub failed_scores: usize,
	/// Scores with an explicit `pass: true`.
	pub passed: usize,
	/// Scores carrying an explicit `pass` field.
	pub total_with_pass: usize,
	/// `passed / total_with_pass`, absent when no evaluator reported `pass`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pass_rate: Option<f64>,
	#[serde(default)]
	pub evaluators: Vec<EvaluatorStats>,
}

/// Statistics for one evaluator applied to one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorStats {
	pub job_name: String,
	pub evaluator_name: String,
	pub count: usize,
	pub errors: usize,
	/// Mean over numeric and boolean values.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mean: Option<f64>,
	pub passed: usize,
	pub total_with_pass: usize,
	#[serde(skip)]
	numeric_sum: f64,
	#[serde(skip)]
	numeric_count: usize,
}

impl EvaluatorStats {
	fn new(job_name: &str, evaluator_name: &str) -> Self {
		Self {
			job_name: job_name.to_string(),
			evaluator_name: evaluator_name.to_string(),
			count: 0,
			errors: 0,
			mean: None,
			passed: 0,
			total_with_pass: 0,
			numeric_sum: 0.0,
			numeric_count: 0,
		}
	}

	fn record(&mut self, score: &EvaluatorScore) {
		self.count += 1;
		if score.error.is_some() {
			self.errors += 1;
			return;
		}
		if let Some(n) = score.score.value.as_f64() {
			self.numeric_sum += n;
			self.numeric_count += 1;
			self.mean = Some(self.numeric_sum / self.numeric_count as f64);
		}
		if let Some(pass) = score.score.pass {
			self.total_with_pass += 1;
			if pass {
				self.passed += 1;
			}
		}
	}
}

/// Compute summary counts over a result set.
pub fn summarize(results: &[DataPointResult]) -> EvalSummary {
	let mut summary = EvalSummary { total_data_points: results.len(), ..Default::default() };

	for dpr in results {
		if dpr.error.is_some() {
			summary.failed_data_points += 1;
		}
		for jr in dpr.job_results.iter().flatten() {
			summary.total_jobs += 1;
			if jr.error.is_some() {
				summary.failed_jobs += 1;
			}
			for score in jr.evaluator_scores.iter().flatten() {
				summary.total_scores += 1;
				if score.error.is_some() {
					summary.failed_scores += 1;
				} else if let Some(pass) = score.score.pass {
					summary.total_with_pass += 1;
					if pass {
						summary.passed += 1;
					}
				}

				let idx = match summary
					.evaluators
					.iter()
					.position(|s| s.job_name == jr.job_name && s.evaluator_name == score.evaluator_name)
				{
					Some(idx) => idx,
					None => {
						summary.evaluators.push(EvaluatorStats::new(&jr.job_name, &score.evaluator_name));
						summary.evaluators.len() - 1
					}
				};
				summary.evaluators[idx].record(score);
			}
		}
	}

	if summary.total_with_pass > 0 {
		summary.pass_rate = Some(summary.passed as f64 / summary.total_with_pass as f64);
	}
	summary
}

/// True when any evaluator score explicitly reported `pass: false`.
/// A missing `pass` field never fails the run.
pub fn run_failed(results: &[DataPointResult]) -> bool {
	results
		.iter()
		.flat_map(|dpr| dpr.job_results.iter().flatten())
		.flat_map(|jr| jr.evaluator_scores.iter().flatten())
		.any(|score| score.error.is_none() && score.score.pass == Some(false))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
	Passed,
	Failed,
}

impl RunOutcome {
	pub fn from_results(results: &[DataPointResult]) -> Self {
		if run_failed(results) {
			RunOutcome::Failed
		} else {
			RunOutcome::Passed
		}
	}

	pub fn is_failed(self) -> bool {
		self == RunOutcome::Failed
	}

	/// Process exit code for this outcome.
	pub fn exit_code(self) -> i32 {
		match self {
			RunOutcome::Passed => 0,
			RunOutcome::Failed => 1,
		}
	}
}

#[derive(Debug, Clone, Tabled)]
struct ResultRow {
	row: usize,
	job: String,
	output: String,
	scores: String,
	error: String,
}

#[derive(Debug, Clone, Tabled)]
struct EvaluatorRow {
	job: String,
	evaluator: String,
	count: usize,
	errors: usize,
	mean: String,
	pass_rate: String,
}

/// One row per job invocation; failed data points get a single row.
pub fn results_table(results: &[DataPointResult]) -> String {
	let mut rows = Vec::new();
	for (row, dpr) in results.iter().enumerate() {
		match &dpr.job_results {
			None => rows.push(ResultRow {
				row,
				job: "-".to_string(),
				output: "-".to_string(),
				scores: "-".to_string(),
				error: truncate(dpr.error.clone().unwrap_or_default(), 48),
			}),
			Some(job_results) => {
				for jr in job_results {
					let scores = jr
						.evaluator_scores
						.iter()
						.flatten()
						.map(render_score)
						.collect::<Vec<_>>()
						.join(", ");
					rows.push(ResultRow {
						row,
						job: jr.job_name.clone(),
						output: truncate(value_preview(&jr.output), 48),
						scores,
						error: truncate(jr.error.clone().unwrap_or_default(), 48),
					});
				}
			}
		}
	}
	Table::new(rows).to_string()
}

fn render_score(score: &EvaluatorScore) -> String {
	if score.error.is_some() {
		return format!("{}: ERR", score.evaluator_name);
	}
	if score.score.is_placeholder() {
		return format!("{}: -", score.evaluator_name);
	}
	let mark = match score.score.pass {
		Some(true) => " ✓",
		Some(false) => " ✗",
		None => "",
	};
	format!("{}: {}{}", score.evaluator_name, truncate(score.score.value.to_string(), 24), mark)
}

impl EvalSummary {
	pub fn summary_table(&self) -> String {
		let rows: Vec<EvaluatorRow> = self
			.evaluators
			.iter()
			.map(|s| EvaluatorRow {
				job: s.job_name.clone(),
				evaluator: s.evaluator_name.clone(),
				count: s.count,
				errors: s.errors,
				mean: s.mean.map(|m| format!("{m:.3}")).unwrap_or_else(|| "-".to_string()),
				pass_rate: if s.total_with_pass == 0 {
					"-".to_string()
				} else {
					format!("{:.1}%", s.passed as f64 * 100.0 / s.total_with_pass as f64)
				},
			})
			.collect();

		let pass_rate = self
			.pass_rate
			.map(|r| format!("{:.1}%", r * 100.0))
			.unwrap_or_else(|| "-".to_string());
		let summary_text = format!(
			"Data points: {} ({} failed)  Jobs: {} ({} failed)  Scores: {} ({} errored)  Pass rate: {}",
			self.total_data_points,
			self.failed_data_points,
			self.total_jobs,
			self.failed_jobs,
			self.total_scores,
			self.failed_scores,
			pass_rate
		);

		if rows.is_empty() {
			return format!("{}\n", summary_text);
		}
		format!("{}\n\n{}\n", Table::new(rows), summary_text)
	}
}

fn value_preview(v: &Value) -> String {
	match v {
		Value::String(s) => s.clone(),
		_ => v.to_string(),
	}
}

fn truncate(s: String, max_len: usize) -> String {
	if s.chars().count() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}
