use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{ApiCredentials, DatasetConfig, EvaluatorqConfig};
use crate::dataset::{DatasetProvider, HttpDatasetProvider};
use crate::datasource::{DataPointSource, DataSource};
use crate::error::EvaluatorqError;
use crate::evaluator::Evaluator;
use crate::job::Job;
use crate::pipeline::Pipeline;
use crate::progress::{Phase, ProgressState, ProgressTracker, ProgressUpdate};
use crate::sink::{HttpResultUploader, ResultSink, TableSink};
use crate::{summarize, DataPoint, DataPointResult, EvaluatorqResult, RunReport};

enum DataInput {
	Points(Vec<DataPointSource>),
	Source(Arc<dyn DataSource>),
	Dataset(Arc<dyn DatasetProvider>),
}

pub struct EvaluatorqBuilder {
	name: String,
	description: Option<String>,
	data: Option<DataInput>,
	remote: Option<DatasetConfig>,
	jobs: Vec<Arc<dyn Job>>,
	evaluators: Vec<Arc<dyn Evaluator>>,
	parallelism: usize,
	job_timeout: Option<Duration>,
	sinks: Vec<Arc<dyn ResultSink>>,
	print: bool,
	upload: bool,
	credentials: Option<ApiCredentials>,
}

impl EvaluatorqBuilder {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			description: None,
			data: None,
			remote: None,
			jobs: Vec::new(),
			evaluators: Vec::new(),
			parallelism: 1,
			job_timeout: None,
			sinks: Vec::new(),
			print: true,
			upload: false,
			credentials: ApiCredentials::from_env(),
		}
	}

	/// Start from a loaded configuration. A configured dataset becomes the
	/// data source.
	pub fn from_config(config: &EvaluatorqConfig) -> Self {
		let mut builder = Self::new(config.name.clone())
			.parallelism(config.parallelism)
			.print(config.print)
			.upload(config.upload);
		builder.description = config.description.clone();
		builder.job_timeout = config.job_timeout();
		if let Some(dataset) = &config.dataset {
			builder = builder.remote_dataset(dataset.clone());
		}
		builder
	}

	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		self
	}

	pub fn description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	/// In-memory data points; entries may be pending futures.
	pub fn data<I, T>(mut self, points: I) -> Self
	where
		I: IntoIterator<Item = T>,
		T: Into<DataPointSource>,
	{
		self.data = Some(DataInput::Points(points.into_iter().map(Into::into).collect()));
		self.remote = None;
		self
	}

	pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Self {
		self.data = Some(DataInput::Source(source));
		self.remote = None;
		self
	}

	/// A paginated source; data points are evaluated as pages arrive.
	pub fn dataset(mut self, provider: Arc<dyn DatasetProvider>) -> Self {
		self.data = Some(DataInput::Dataset(provider));
		self.remote = None;
		self
	}

	/// A dataset on the remote platform. Requires `ORQ_API_KEY`.
	pub fn remote_dataset(mut self, dataset: DatasetConfig) -> Self {
		self.data = None;
		self.remote = Some(dataset);
		self
	}

	pub fn job(mut self, job: Arc<dyn Job>) -> Self {
		self.jobs.push(job);
		self
	}

	pub fn jobs<I>(mut self, jobs: I) -> Self
	where
		I: IntoIterator<Item = Arc<dyn Job>>,
	{
		self.jobs.extend(jobs);
		self
	}

	pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
		self.evaluators.push(evaluator);
		self
	}

	pub fn evaluators<I>(mut self, evaluators: I) -> Self
	where
		I: IntoIterator<Item = Arc<dyn Evaluator>>,
	{
		self.evaluators.extend(evaluators);
		self
	}

	/// Bound on in-flight data points, and separately on in-flight jobs per
	/// data point. Up to `n * n` jobs can therefore run at once.
	pub fn parallelism(mut self, n: usize) -> Self {
		self.parallelism = n.max(1);
		self
	}

	/// Deadline for each job and evaluator call. Off by default.
	pub fn job_timeout(mut self, timeout: Duration) -> Self {
		self.job_timeout = Some(timeout);
		self
	}

	pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
		self.sinks.push(sink);
		self
	}

	/// Print result tables to stdout when the run finishes.
	pub fn print(mut self, print: bool) -> Self {
		self.print = print;
		self
	}

	/// Upload the finished run to the remote platform. Requires `ORQ_API_KEY`.
	pub fn upload(mut self, upload: bool) -> Self {
		self.upload = upload;
		self
	}

	/// Override credentials picked up from the environment.
	pub fn credentials(mut self, credentials: Option<ApiCredentials>) -> Self {
		self.credentials = credentials;
		self
	}

	pub fn build(self) -> Result<Evaluatorq, EvaluatorqError> {
		let data = match (self.data, self.remote) {
			(_, Some(dataset)) => {
				let credentials = self
					.credentials
					.as_ref()
					.ok_or(EvaluatorqError::MissingApiKey("fetch a remote dataset"))?;
				DataInput::Dataset(Arc::new(HttpDatasetProvider::new(credentials, &dataset)))
			}
			(Some(data), None) => data,
			(None, None) => return Err(EvaluatorqError::MissingDataSource),
		};
		if self.jobs.is_empty() {
			return Err(EvaluatorqError::NoJobs);
		}

		let mut sinks: Vec<Arc<dyn ResultSink>> = Vec::new();
		if self.print {
			sinks.push(Arc::new(TableSink));
		}
		sinks.extend(self.sinks);
		if self.upload {
			let credentials = self.credentials.ok_or(EvaluatorqError::MissingApiKey("upload results"))?;
			sinks.push(Arc::new(HttpResultUploader::new(credentials)));
		}

		let progress = ProgressTracker::new();
		Ok(Evaluatorq {
			name: self.name,
			description: self.description,
			data,
			parallelism: self.parallelism,
			pipeline: Arc::new(Pipeline {
				jobs: self.jobs,
				evaluators: self.evaluators,
				parallelism: self.parallelism,
				timeout: self.job_timeout,
				progress: progress.clone(),
			}),
			sinks,
			progress,
		})
	}
}

/// A configured evaluation run.
pub struct Evaluatorq {
	name: String,
	description: Option<String>,
	data: DataInput,
	parallelism: usize,
	pipeline: Arc<Pipeline>,
	sinks: Vec<Arc<dyn ResultSink>>,
	progress: ProgressTracker,
}

impl Evaluatorq {
	pub fn builder(name: impl Into<String>) -> EvaluatorqBuilder {
		EvaluatorqBuilder::new(name)
	}

	/// Subscribe to progress updates. Subscribe before calling [`Evaluatorq::run`].
	pub fn progress(&self) -> watch::Receiver<ProgressState> {
		self.progress.subscribe()
	}

	/// Run every data point through every job and evaluator.
	///
	/// Failures of data points, jobs and evaluators are recorded in the
	/// returned results. Only a data source that cannot be loaded at all is
	/// returned as an error.
	pub async fn run(self) -> Result<RunReport, EvaluatorqError> {
		let Evaluatorq { name, description, data, parallelism, pipeline, sinks, progress } = self;
		let started = Instant::now();
		info!(
			name = %name,
			parallelism,
			jobs = pipeline.jobs.len(),
			evaluators = pipeline.evaluators.len(),
			"starting evaluation"
		);
		progress.update(ProgressUpdate::phase(Phase::Initializing));

		let results = match data {
			DataInput::Points(sources) => run_eager(&pipeline, sources, parallelism).await,
			DataInput::Source(source) => {
				progress.update(ProgressUpdate::phase(Phase::Fetching));
				let sources = source
					.load()
					.await
					.map_err(|err| EvaluatorqError::DataLoad(format!("{err:#}")))?;
				run_eager(&pipeline, sources, parallelism).await
			}
			DataInput::Dataset(provider) => run_streaming(&pipeline, provider, parallelism).await?,
		};

		progress.complete();
		let report = RunReport {
			summary: summarize(&results),
			name,
			description,
			results,
			duration_ms: started.elapsed().as_millis() as u64,
		};
		info!(
			data_points = report.summary.total_data_points,
			failed_data_points = report.summary.failed_data_points,
			failed_jobs = report.summary.failed_jobs,
			duration_ms = report.duration_ms,
			outcome = ?report.outcome(),
			"evaluation finished"
		);
		publish(&sinks, &report).await;
		Ok(report)
	}
}

/// Hand the report to every sink. A sink that fails or panics is logged and
/// skipped.
async fn publish(sinks: &[Arc<dyn ResultSink>], report: &RunReport) {
	for sink in sinks {
		match AssertUnwindSafe(sink.publish(report)).catch_unwind().await {
			Ok(Ok(())) => {}
			Ok(Err(err)) => warn!(sink = sink.name(), error = %format!("{err:#}"), "result sink failed"),
			Err(_) => warn!(sink = sink.name(), "result sink panicked"),
		}
	}
}

/// Known, finite input. At most `parallelism` data points are in flight and
/// a finished one frees its slot at once; results are put back in input order.
async fn run_eager(pipeline: &Pipeline, sources: Vec<DataPointSource>, parallelism: usize) -> EvaluatorqResult {
	pipeline.progress.update(ProgressUpdate::phase(Phase::Processing).total(sources.len()));
	let runs: Vec<_> = sources
		.into_iter()
		.enumerate()
		.map(|(row, source)| async move { (row, pipeline.process(source, row).await) })
		.collect();
	let mut done: Vec<(usize, DataPointResult)> = stream::iter(runs).buffer_unordered(parallelism).collect().await;
	done.sort_by_key(|(row, _)| *row);
	done.into_iter().map(|(_, result)| result).collect()
}

/// Paged input: each data point starts as soon as its page arrives and a
/// permit is free. Results are placed by discovery order.
async fn run_streaming(
	pipeline: &Arc<Pipeline>,
	provider: Arc<dyn DatasetProvider>,
	parallelism: usize,
) -> Result<EvaluatorqResult, EvaluatorqError> {
	let semaphore = Arc::new(Semaphore::new(parallelism));
	let mut in_flight = JoinSet::new();
	let mut slots: Vec<Option<DataPointResult>> = Vec::new();
	let mut cursor: Option<String> = None;

	loop {
		pipeline.progress.update(ProgressUpdate::phase(Phase::Fetching));
		let page = provider.fetch_batch(cursor.as_deref()).await.map_err(|err| {
			match err.downcast::<EvaluatorqError>() {
				Ok(err) => err,
				Err(other) => EvaluatorqError::DataLoad(format!("{other:#}")),
			}
		})?;
		pipeline.progress.add_total(page.items.len());

		for data_point in page.items {
			let permit = Arc::clone(&semaphore)
				.acquire_owned()
				.await
				.map_err(|err| EvaluatorqError::DataLoad(err.to_string()))?;
			let row = slots.len();
			slots.push(None);
			let pipeline = Arc::clone(pipeline);
			in_flight.spawn(async move {
				let _permit = permit;
				(row, pipeline.process(DataPointSource::Ready(data_point), row).await)
			});
		}

		match page.next_cursor {
			Some(next) if page.has_more => cursor = Some(next),
			_ => break,
		}
	}

	while let Some(joined) = in_flight.join_next().await {
		match joined {
			Ok((row, result)) => slots[row] = Some(result),
			Err(err) => warn!(error = %err, "data point task did not complete"),
		}
	}

	Ok(slots
		.into_iter()
		.map(|slot| {
			slot.unwrap_or_else(|| DataPointResult {
				data_point: DataPoint::placeholder(),
				error: Some("data point pipeline did not complete".to_string()),
				job_results: None,
			})
		})
		.collect())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dataset::DatasetPage;
	use crate::evaluator::evaluator;
	use crate::job::job;
	use crate::{run_failed, ScoreResult};
	use anyhow::anyhow;
	use async_trait::async_trait;
	use serde_json::{json, Value};
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	use std::sync::Mutex;

	fn double() -> Arc<dyn Job> {
		job("double", |data: &DataPoint, _row| {
			let x = data.input("x").and_then(Value::as_i64);
			async move {
				match x {
					Some(x) => Ok(json!(x * 2)),
					None => Err(anyhow!("missing x")),
				}
			}
		})
	}

	fn points(xs: &[i64]) -> Vec<DataPoint> {
		xs.iter().map(|x| DataPoint::new(json!({ "x": x }))).collect()
	}

	fn tracked(name: &str, current: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Arc<dyn Job> {
		job(name.to_string(), move |data: &DataPoint, _row| {
			let current = current.clone();
			let peak = peak.clone();
			let x = data.input("x").cloned().unwrap_or(Value::Null);
			async move {
				let now = current.fetch_add(1, Ordering::SeqCst) + 1;
				peak.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(10)).await;
				current.fetch_sub(1, Ordering::SeqCst);
				Ok(x)
			}
		})
	}

	struct Recording(Mutex<Vec<RunReport>>);

	#[async_trait]
	impl ResultSink for Recording {
		fn name(&self) -> &str {
			"recording"
		}

		async fn publish(&self, report: &RunReport) -> anyhow::Result<()> {
			self.0.lock().unwrap().push(report.clone());
			Ok(())
		}
	}

	struct Broken;

	struct Exploding;

	#[async_trait]
	impl ResultSink for Exploding {
		fn name(&self) -> &str {
			"exploding"
		}

		async fn publish(&self, _report: &RunReport) -> anyhow::Result<()> {
			panic!("sink exploded");
		}
	}

	#[async_trait]
	impl ResultSink for Broken {
		fn name(&self) -> &str {
			"broken"
		}

		async fn publish(&self, _report: &RunReport) -> anyhow::Result<()> {
			Err(anyhow!("upload refused"))
		}
	}

	/// Serves `pages` in order; the cursor is the next page index.
	struct PagedProvider {
		pages: Vec<Vec<DataPoint>>,
		fetches: AtomicUsize,
	}

	#[async_trait]
	impl DatasetProvider for PagedProvider {
		async fn fetch_batch(&self, cursor: Option<&str>) -> anyhow::Result<DatasetPage> {
			self.fetches.fetch_add(1, Ordering::SeqCst);
			let idx = cursor.map(|c| c.parse::<usize>()).transpose()?.unwrap_or(0);
			let items = self.pages.get(idx).cloned().unwrap_or_default();
			let has_more = idx + 1 < self.pages.len();
			Ok(DatasetPage { items, next_cursor: Some((idx + 1).to_string()), has_more })
		}
	}

	#[tokio::test]
	async fn doubles_each_input_in_order() {
		let report = Evaluatorq::builder("double")
			.data(points(&[1, 2]))
			.job(double())
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let results = &report.results;
		assert_eq!(results.len(), 2);
		assert_eq!(results[0].job_results.as_ref().unwrap()[0].output, json!(2));
		assert_eq!(results[1].job_results.as_ref().unwrap()[0].output, json!(4));
		assert_eq!(results[0].job_results.as_ref().unwrap()[0].evaluator_scores, Some(vec![]));
	}

	#[tokio::test]
	async fn rejected_data_point_is_isolated() {
		let sources = vec![
			DataPointSource::Ready(DataPoint::new(json!({"x": 1}))),
			DataPointSource::pending(async { Err(anyhow!("boom")) }),
			DataPointSource::pending(async { Ok(DataPoint::new(json!({"x": 3}))) }),
		];
		let report = Evaluatorq::builder("isolation")
			.data(sources)
			.job(double())
			.parallelism(2)
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let results = &report.results;
		assert_eq!(results.len(), 3);
		assert_eq!(results[1].error.as_deref(), Some("boom"));
		assert!(results[1].job_results.is_none());
		assert_eq!(results[0].job_results.as_ref().unwrap()[0].output, json!(2));
		assert_eq!(results[2].job_results.as_ref().unwrap()[0].output, json!(6));
		assert_eq!(report.summary.failed_data_points, 1);
	}

	#[tokio::test]
	async fn failing_job_does_not_affect_siblings() {
		let picky = job("picky", |data: &DataPoint, _row| {
			let x = data.input("x").and_then(Value::as_i64).unwrap_or_default();
			async move {
				if x == 2 {
					Err(anyhow!("job failed"))
				} else {
					Ok(json!(x))
				}
			}
		});
		let calls = Arc::new(AtomicUsize::new(0));
		let counted = {
			let calls = calls.clone();
			evaluator("counted", move |_data: &DataPoint, _output: &Value| {
				calls.fetch_add(1, Ordering::SeqCst);
				async { Ok(ScoreResult::new(1.0)) }
			})
		};

		let report = Evaluatorq::builder("jobs")
			.data(points(&[1, 2, 3]))
			.jobs([picky, double()])
			.evaluator(counted)
			.parallelism(3)
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let second = report.results[1].job_results.as_ref().unwrap();
		assert_eq!(second.len(), 2);
		assert_eq!(second[0].job_name, "picky");
		assert_eq!(second[0].error.as_deref(), Some("job failed"));
		assert!(second[0].evaluator_scores.is_none());
		assert_eq!(second[1].output, json!(4));

		let third = report.results[2].job_results.as_ref().unwrap();
		assert_eq!(third[0].output, json!(3));
		// 3 data points x 2 jobs, minus the one failed job.
		assert_eq!(calls.load(Ordering::SeqCst), 5);
		assert_eq!(report.summary.failed_jobs, 1);
	}

	#[tokio::test]
	async fn evaluator_failure_keeps_job_result() {
		let failing = evaluator("strict", |_data: &DataPoint, _output: &Value| async {
			Err::<ScoreResult, _>(anyhow!("eval failed"))
		});
		let report = Evaluatorq::builder("evals")
			.data(points(&[1]))
			.job(double())
			.evaluator(failing)
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let job_result = &report.results[0].job_results.as_ref().unwrap()[0];
		assert_eq!(job_result.output, json!(2));
		let score = &job_result.evaluator_scores.as_ref().unwrap()[0];
		assert_eq!(score.error.as_deref(), Some("eval failed"));
		assert!(score.score.is_placeholder());
	}

	#[tokio::test]
	async fn explicit_pass_false_fails_the_run() {
		let gate = evaluator("gate", |_data: &DataPoint, _output: &Value| async {
			Ok(ScoreResult::new(true).with_pass(false))
		});
		let report = Evaluatorq::builder("gate")
			.data(points(&[1]))
			.job(double())
			.evaluator(gate)
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		assert!(run_failed(&report.results));
		assert!(report.outcome().is_failed());
	}

	#[tokio::test]
	async fn data_point_concurrency_is_bounded() {
		let current = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));
		let xs: Vec<i64> = (0..10).collect();

		let report = Evaluatorq::builder("bounded")
			.data(points(&xs))
			.job(tracked("slow", current.clone(), peak.clone()))
			.parallelism(3)
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let peak = peak.load(Ordering::SeqCst);
		assert!(peak <= 3, "peak in-flight was {peak}");
		assert!(peak > 1);
		let outputs: Vec<Value> = report
			.results
			.iter()
			.map(|r| r.job_results.as_ref().unwrap()[0].output.clone())
			.collect();
		assert_eq!(outputs, xs.iter().map(|x| json!(x)).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn job_pools_are_independent_per_data_point() {
		let current = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		Evaluatorq::builder("squared")
			.data(points(&[1, 2]))
			.jobs([
				tracked("a", current.clone(), peak.clone()),
				tracked("b", current.clone(), peak.clone()),
			])
			.parallelism(2)
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		assert_eq!(peak.load(Ordering::SeqCst), 4);
	}

	#[tokio::test]
	async fn streaming_dataset_keeps_order_and_bound() {
		let current = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));
		let provider = Arc::new(PagedProvider {
			pages: vec![points(&[0, 1, 2]), points(&[3, 4, 5]), points(&[6, 7])],
			fetches: AtomicUsize::new(0),
		});

		let evaluation = Evaluatorq::builder("streaming")
			.dataset(provider.clone())
			.job(tracked("slow", current.clone(), peak.clone()))
			.parallelism(2)
			.print(false)
			.build()
			.unwrap();
		let progress = evaluation.progress();
		let report = evaluation.run().await.unwrap();

		assert_eq!(provider.fetches.load(Ordering::SeqCst), 3);
		assert!(peak.load(Ordering::SeqCst) <= 2);
		let outputs: Vec<Value> = report
			.results
			.iter()
			.map(|r| r.job_results.as_ref().unwrap()[0].output.clone())
			.collect();
		assert_eq!(outputs, (0..8).map(|x| json!(x)).collect::<Vec<_>>());

		let state = progress.borrow().clone();
		assert_eq!(state.phase, Phase::Completed);
		assert_eq!(state.total_data_points, Some(8));
		assert_eq!(state.completed_data_points, 8);
	}

	#[tokio::test]
	async fn dataset_fetch_error_is_returned() {
		struct Failing;

		#[async_trait]
		impl DatasetProvider for Failing {
			async fn fetch_batch(&self, _cursor: Option<&str>) -> anyhow::Result<DatasetPage> {
				Err(EvaluatorqError::DatasetFetch { status: 503, message: "unavailable".into() }.into())
			}
		}

		let err = Evaluatorq::builder("fetch")
			.dataset(Arc::new(Failing))
			.job(double())
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap_err();
		assert!(matches!(err, EvaluatorqError::DatasetFetch { status: 503, .. }));
	}

	#[test]
	fn remote_dataset_without_api_key_is_a_config_error() {
		let built = Evaluatorq::builder("remote")
			.remote_dataset(DatasetConfig { id: "ds_1".into(), page_size: 10 })
			.credentials(None)
			.job(double())
			.build();
		assert!(matches!(built.err(), Some(EvaluatorqError::MissingApiKey(_))));

		let built = Evaluatorq::builder("upload")
			.data(points(&[1]))
			.job(double())
			.credentials(None)
			.upload(true)
			.build();
		assert!(matches!(built.err(), Some(EvaluatorqError::MissingApiKey(_))));
	}

	#[test]
	fn build_requires_data_and_jobs() {
		let built = Evaluatorq::builder("empty").job(double()).build();
		assert!(matches!(built.err(), Some(EvaluatorqError::MissingDataSource)));

		let built = Evaluatorq::builder("empty").data(points(&[1])).build();
		assert!(matches!(built.err(), Some(EvaluatorqError::NoJobs)));
	}

	#[tokio::test]
	async fn failing_sink_does_not_fail_the_run() {
		let recording = Arc::new(Recording(Mutex::new(Vec::new())));
		let report = Evaluatorq::builder("sinks")
			.description("sink isolation")
			.data(points(&[1]))
			.job(double())
			.sink(Arc::new(Broken))
			.sink(recording.clone())
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let published = recording.0.lock().unwrap();
		assert_eq!(published.len(), 1);
		assert_eq!(published[0].description.as_deref(), Some("sink isolation"));
		assert_eq!(published[0].results, report.results);
	}

	#[tokio::test]
	async fn panicking_sink_does_not_fail_the_run() {
		let recording = Arc::new(Recording(Mutex::new(Vec::new())));
		let report = Evaluatorq::builder("sinks")
			.data(points(&[1]))
			.job(double())
			.sink(Arc::new(Exploding))
			.sink(recording.clone())
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		assert_eq!(report.results.len(), 1);
		assert_eq!(recording.0.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn slow_data_point_does_not_hold_back_the_others() {
		let slow_running = Arc::new(AtomicBool::new(false));
		let overlapped = Arc::new(AtomicUsize::new(0));
		let watched = {
			let slow_running = slow_running.clone();
			let overlapped = overlapped.clone();
			job("watched", move |data: &DataPoint, _row| {
				let slow_running = slow_running.clone();
				let overlapped = overlapped.clone();
				let x = data.input("x").and_then(Value::as_i64).unwrap_or_default();
				async move {
					if x == 0 {
						slow_running.store(true, Ordering::SeqCst);
						tokio::time::sleep(Duration::from_millis(300)).await;
						slow_running.store(false, Ordering::SeqCst);
					} else {
						tokio::task::yield_now().await;
						if slow_running.load(Ordering::SeqCst) {
							overlapped.fetch_add(1, Ordering::SeqCst);
						}
						tokio::time::sleep(Duration::from_millis(5)).await;
					}
					Ok(json!(x))
				}
			})
		};
		let xs: Vec<i64> = (0..10).collect();

		let report = Evaluatorq::builder("slow_row")
			.data(points(&xs))
			.job(watched)
			.parallelism(2)
			.print(false)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		assert_eq!(overlapped.load(Ordering::SeqCst), 9);
		let outputs: Vec<Value> = report
			.results
			.iter()
			.map(|r| r.job_results.as_ref().unwrap()[0].output.clone())
			.collect();
		assert_eq!(outputs, xs.iter().map(|x| json!(x)).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn run_can_be_spawned() {
		let sources = vec![
			DataPointSource::pending(async { Ok(DataPoint::new(json!({"x": 5}))) }),
			DataPointSource::Failed("unreadable".into()),
		];
		let evaluation = Evaluatorq::builder("spawned").data(sources).job(double()).print(false).build().unwrap();

		let report = tokio::spawn(evaluation.run()).await.unwrap().unwrap();
		assert_eq!(report.results[0].job_results.as_ref().unwrap()[0].output, json!(10));
		assert_eq!(report.results[1].error.as_deref(), Some("unreadable"));
	}

	#[test]
	fn name_overrides_configured_name() {
		let config = EvaluatorqConfig { name: "from-file".into(), ..Default::default() };
		let evaluation = EvaluatorqBuilder::from_config(&config)
			.name("from-flag")
			.data(points(&[1]))
			.job(double())
			.build()
			.unwrap();
		assert_eq!(evaluation.name, "from-flag");
	}

	#[tokio::test]
	async fn from_config_applies_timeout() {
		let config = EvaluatorqConfig { job_timeout_ms: Some(20), print: false, ..Default::default() };
		let hung = job("hung", |_data: &DataPoint, _row| async {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Ok(Value::Null)
		});
		let report = EvaluatorqBuilder::from_config(&config)
			.data(points(&[1]))
			.job(hung)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let job_result = &report.results[0].job_results.as_ref().unwrap()[0];
		assert_eq!(job_result.error.as_deref(), Some("job timed out after 20ms"));
	}
}
