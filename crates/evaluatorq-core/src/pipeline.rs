//! Per-data-point pipeline: resolve the data point, fan out to jobs, fan out
//! to evaluators. Every stage records its own failure and never aborts its
//! siblings.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::datasource::DataPointSource;
use crate::error::{job_name_of, UNKNOWN_JOB};
use crate::evaluator::Evaluator;
use crate::job::Job;
use crate::progress::{Phase, ProgressTracker, ProgressUpdate};
use crate::{DataPoint, DataPointResult, EvaluatorScore, JobResult, ScoreResult};

pub(crate) struct Pipeline {
	pub(crate) jobs: Vec<Arc<dyn Job>>,
	pub(crate) evaluators: Vec<Arc<dyn Evaluator>>,
	/// Bound on concurrently running jobs for one data point.
	pub(crate) parallelism: usize,
	pub(crate) timeout: Option<Duration>,
	pub(crate) progress: ProgressTracker,
}

impl Pipeline {
	/// Resolve one data point and run every job against it.
	pub(crate) async fn process(&self, source: DataPointSource, row: usize) -> DataPointResult {
		self.progress.update(ProgressUpdate::phase(Phase::Processing).data_point(row));

		let result = match guarded(None, "data point", source.resolve()).await {
			Err(err) => {
				debug!(row, error = %err, "data point failed to resolve");
				DataPointResult {
					data_point: DataPoint::placeholder(),
					error: Some(err.to_string()),
					job_results: None,
				}
			}
			Ok(data_point) => {
				let job_results = self.run_jobs(&data_point, row).await;
				DataPointResult { data_point, error: None, job_results: Some(job_results) }
			}
		};

		self.progress.data_point_completed();
		result
	}

	/// At most `parallelism` jobs in flight; a finished job frees its slot at
	/// once. Results keep job order.
	async fn run_jobs(&self, data: &DataPoint, row: usize) -> Vec<JobResult> {
		let runs: Vec<_> = self
			.jobs
			.iter()
			.enumerate()
			.map(|(idx, job)| async move { (idx, self.run_job(job.as_ref(), data, row).await) })
			.collect();
		let mut done: Vec<(usize, JobResult)> = stream::iter(runs).buffer_unordered(self.parallelism).collect().await;
		done.sort_by_key(|(idx, _)| *idx);
		done.into_iter().map(|(_, result)| result).collect()
	}

	/// Run one job; on success score its output with every evaluator.
	pub(crate) async fn run_job(&self, job: &dyn Job, data: &DataPoint, row: usize) -> JobResult {
		match guarded(self.timeout, "job", job.run(data, row)).await {
			Ok(out) => {
				self.progress.update(ProgressUpdate::phase(Phase::Evaluating).data_point(row).job(out.name.clone()));
				let scores = self.score_all(data, &out.output).await;
				JobResult { job_name: out.name, output: out.output, error: None, evaluator_scores: Some(scores) }
			}
			Err(err) => {
				let job_name = job_name_of(&err).or_else(|| job.name()).unwrap_or(UNKNOWN_JOB).to_string();
				debug!(row, job = %job_name, error = %err, "job failed");
				JobResult { job_name, output: Value::Null, error: Some(err.to_string()), evaluator_scores: None }
			}
		}
	}

	/// Evaluators run concurrently without a bound; results keep evaluator order.
	pub(crate) async fn score_all(&self, data: &DataPoint, output: &Value) -> Vec<EvaluatorScore> {
		join_all(self.evaluators.iter().map(|evaluator| self.score_one(evaluator.as_ref(), data, output))).await
	}

	pub(crate) async fn score_one(&self, evaluator: &dyn Evaluator, data: &DataPoint, output: &Value) -> EvaluatorScore {
		let evaluator_name = evaluator.name().to_string();
		self.progress.update(ProgressUpdate::phase(Phase::Evaluating).evaluator(evaluator_name.clone()));

		match guarded(self.timeout, "evaluator", evaluator.score(data, output)).await {
			Ok(score) => EvaluatorScore { evaluator_name, score, error: None },
			Err(err) => {
				debug!(evaluator = %evaluator_name, error = %err, "evaluator failed");
				EvaluatorScore { evaluator_name, score: ScoreResult::placeholder(), error: Some(err.to_string()) }
			}
		}
	}
}

/// Await `fut`, turning panics and an expired deadline into errors.
async fn guarded<T, F>(timeout: Option<Duration>, what: &str, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	let fut = AssertUnwindSafe(fut).catch_unwind();
	let outcome = match timeout {
		Some(limit) => match tokio::time::timeout(limit, fut).await {
			Ok(outcome) => outcome,
			Err(_) => return Err(anyhow!("{what} timed out after {}ms", limit.as_millis())),
		},
		None => fut.await,
	};
	outcome.unwrap_or_else(|payload| Err(anyhow!("{what} panicked: {}", panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::evaluator::evaluator;
	use crate::job::{from_async_fn, job};
	use serde_json::json;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

	fn pipeline(jobs: Vec<Arc<dyn Job>>, evaluators: Vec<Arc<dyn Evaluator>>) -> Pipeline {
		Pipeline { jobs, evaluators, parallelism: 1, timeout: None, progress: ProgressTracker::new() }
	}

	fn echo() -> Arc<dyn Job> {
		job("echo", |data: &DataPoint, _row| {
			let inputs = Value::Object(data.inputs.clone());
			async move { Ok(inputs) }
		})
	}

	#[tokio::test]
	async fn evaluator_failure_gets_placeholder_score() {
		let failing = evaluator("strict", |_data: &DataPoint, _output: &Value| async {
			Err::<ScoreResult, _>(anyhow!("eval failed"))
		});
		let ok = evaluator("ok", |_data: &DataPoint, _output: &Value| async { Ok(ScoreResult::new(true)) });
		let p = pipeline(vec![echo()], vec![failing, ok]);

		let result = p.run_job(echo().as_ref(), &DataPoint::new(json!({"x": 1})), 0).await;
		let scores = result.evaluator_scores.unwrap();
		assert_eq!(scores.len(), 2);
		assert_eq!(scores[0].error.as_deref(), Some("eval failed"));
		assert!(scores[0].score.is_placeholder());
		assert_eq!(scores[1].score, ScoreResult::new(true));
	}

	#[tokio::test]
	async fn failed_job_skips_evaluators() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counted = {
			let calls = calls.clone();
			evaluator("counted", move |_data: &DataPoint, _output: &Value| {
				calls.fetch_add(1, Ordering::SeqCst);
				async { Ok(ScoreResult::new(1.0)) }
			})
		};
		let failing = job("broken", |_data: &DataPoint, _row| async { Err::<Value, _>(anyhow!("job failed")) });
		let p = pipeline(vec![failing.clone()], vec![counted]);

		let result = p.run_job(failing.as_ref(), &DataPoint::placeholder(), 0).await;
		assert_eq!(result.job_name, "broken");
		assert_eq!(result.output, Value::Null);
		assert_eq!(result.error.as_deref(), Some("job failed"));
		assert!(result.evaluator_scores.is_none());
		assert_eq!(calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn anonymous_failing_job_is_unknown() {
		let anonymous = from_async_fn(|_data: &DataPoint, _row| async {
			Err::<crate::job::JobOutput, _>(anyhow!("no name"))
		});
		let p = pipeline(vec![], vec![]);
		let result = p.run_job(anonymous.as_ref(), &DataPoint::placeholder(), 0).await;
		assert_eq!(result.job_name, UNKNOWN_JOB);
	}

	#[tokio::test]
	async fn panicking_job_is_captured_with_its_name() {
		let panicky = job("panicky", |_data: &DataPoint, _row| async {
			if true {
				panic!("kaboom");
			}
			Ok(Value::Null)
		});
		let p = pipeline(vec![], vec![]);
		let result = p.run_job(panicky.as_ref(), &DataPoint::placeholder(), 0).await;
		assert_eq!(result.job_name, "panicky");
		assert_eq!(result.error.as_deref(), Some("job panicked: kaboom"));
	}

	#[tokio::test]
	async fn slow_job_times_out_when_deadline_set() {
		let slow = job("slow", |_data: &DataPoint, _row| async {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Ok(json!("late"))
		});
		let mut p = pipeline(vec![], vec![]);
		p.timeout = Some(Duration::from_millis(20));
		let result = p.run_job(slow.as_ref(), &DataPoint::placeholder(), 0).await;
		assert_eq!(result.job_name, "slow");
		assert_eq!(result.error.as_deref(), Some("job timed out after 20ms"));
	}

	#[tokio::test]
	async fn unresolved_data_point_runs_no_jobs() {
		let runs = Arc::new(AtomicUsize::new(0));
		let counted = {
			let runs = runs.clone();
			job("counted", move |_data: &DataPoint, _row| {
				runs.fetch_add(1, Ordering::SeqCst);
				async { Ok(Value::Null) }
			})
		};
		let p = pipeline(vec![counted], vec![]);
		let result = p.process(DataPointSource::pending(async { Err(anyhow!("boom")) }), 0).await;
		assert_eq!(result.error.as_deref(), Some("boom"));
		assert!(result.job_results.is_none());
		assert_eq!(result.data_point, DataPoint::placeholder());
		assert_eq!(runs.load(Ordering::SeqCst), 0);
		assert_eq!(p.progress.snapshot().completed_data_points, 1);
	}

	#[tokio::test]
	async fn slow_job_does_not_hold_back_the_others() {
		let slow_running = Arc::new(AtomicBool::new(false));
		let overlapped = Arc::new(AtomicUsize::new(0));
		let slow = {
			let slow_running = slow_running.clone();
			job("slow", move |_data: &DataPoint, _row| {
				let slow_running = slow_running.clone();
				async move {
					slow_running.store(true, Ordering::SeqCst);
					tokio::time::sleep(Duration::from_millis(300)).await;
					slow_running.store(false, Ordering::SeqCst);
					Ok(json!("slow"))
				}
			})
		};
		let mut jobs = vec![slow];
		for i in 0..5 {
			let slow_running = slow_running.clone();
			let overlapped = overlapped.clone();
			jobs.push(job(format!("fast{i}"), move |_data: &DataPoint, _row| {
				let slow_running = slow_running.clone();
				let overlapped = overlapped.clone();
				async move {
					tokio::task::yield_now().await;
					if slow_running.load(Ordering::SeqCst) {
						overlapped.fetch_add(1, Ordering::SeqCst);
					}
					tokio::time::sleep(Duration::from_millis(5)).await;
					Ok(json!(i))
				}
			}));
		}
		let mut p = pipeline(jobs, vec![]);
		p.parallelism = 2;

		let result = p.process(DataPoint::new(json!({})).into(), 0).await;
		assert_eq!(overlapped.load(Ordering::SeqCst), 5);
		let names: Vec<_> = result.job_results.unwrap().into_iter().map(|jr| jr.job_name).collect();
		assert_eq!(names, vec!["slow", "fast0", "fast1", "fast2", "fast3", "fast4"]);
	}

	#[tokio::test]
	async fn job_results_follow_job_order() {
		let slow = job("slow", |_data: &DataPoint, _row| async {
			tokio::time::sleep(Duration::from_millis(30)).await;
			Ok(json!(1))
		});
		let fast = job("fast", |_data: &DataPoint, _row| async { Ok(json!(2)) });
		let mut p = pipeline(vec![slow, fast], vec![]);
		p.parallelism = 2;
		let result = p.process(DataPoint::new(json!({})).into(), 0).await;
		let names: Vec<_> = result.job_results.unwrap().into_iter().map(|jr| jr.job_name).collect();
		assert_eq!(names, vec!["slow", "fast"]);
	}
}
