//! evaluatorq-core: evaluation engine for AI jobs.
//! Data points flow through jobs, job outputs flow through evaluators, and the
//! collected tree is handed to sinks. See `demos/quickstart.rs`.

pub mod config;
pub mod dataset;
pub mod datasource;
pub mod error;
pub mod evaluator;
pub mod evaluators;
pub mod job;
mod pipeline;
pub mod progress;
pub mod report;
pub mod runner;
pub mod sink;
pub mod testing;

pub use evaluatorq_types::{
	results_table, run_failed, summarize, DataPoint, DataPointResult, EvalSummary, EvaluatorScore, EvaluatorStats,
	EvaluatorqResult, JobResult, RunOutcome, RunReport, ScoreResult, ScoreValue,
};

pub use config::{ApiCredentials, DatasetConfig, EvaluatorqConfig};
pub use dataset::{DatasetPage, DatasetProvider, HttpDatasetProvider};
pub use datasource::{DataPointSource, DataSource, JsonlDataSource, VecDataSource};
pub use error::{EvaluatorqError, JobError};
pub use evaluator::{evaluator, Evaluator};
pub use evaluators::{
	contains::ContainsEvaluator, exact::ExactMatchEvaluator, json::JsonEvaluator, levenshtein::LevenshteinEvaluator,
	regex::RegexEvaluator,
};
pub use job::{from_async_fn, job, Job, JobOutput};
pub use progress::{Phase, ProgressState};
pub use runner::{Evaluatorq, EvaluatorqBuilder};
#[cfg(feature = "persistence")]
pub use sink::StoreSink;
pub use sink::{HtmlReportSink, HttpResultUploader, JsonFileSink, ResultSink, TableSink};
