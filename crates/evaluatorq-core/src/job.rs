use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobError;
use crate::DataPoint;

/// What a job reports on success.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
	pub name: String,
	pub output: Value,
}

impl JobOutput {
	pub fn new(name: impl Into<String>, output: Value) -> Self {
		Self { name: name.into(), output }
	}
}

/// A function under evaluation.
#[async_trait]
pub trait Job: Send + Sync {
	async fn run(&self, data: &DataPoint, row: usize) -> Result<JobOutput>;

	/// Name known before the job runs, if any. Used to label failures the
	/// job could not label itself (panics, timeouts).
	fn name(&self) -> Option<&str> {
		None
	}
}

/// Wrap an async closure that reports its own name as a `Job`.
///
/// If the closure fails, the job shows up as `"Unknown"` unless the error is a
/// [`JobError`]. Prefer [`job`] when the name is known up front.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn Job>
where
	F: Fn(&DataPoint, usize) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<JobOutput>> + Send + 'static,
{
	struct ClosureJob<F> {
		f: F,
	}

	#[async_trait]
	impl<F, Fut> Job for ClosureJob<F>
	where
		F: Fn(&DataPoint, usize) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<JobOutput>> + Send + 'static,
	{
		async fn run(&self, data: &DataPoint, row: usize) -> Result<JobOutput> {
			(self.f)(data, row).await
		}
	}

	Arc::new(ClosureJob { f })
}

/// Wrap an async closure as a named `Job`. The name is attached to any error
/// the closure returns, so failed results still say which job broke.
pub fn job<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Job>
where
	F: Fn(&DataPoint, usize) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Value>> + Send + 'static,
{
	struct NamedJob<F> {
		name: String,
		f: F,
	}

	#[async_trait]
	impl<F, Fut> Job for NamedJob<F>
	where
		F: Fn(&DataPoint, usize) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		async fn run(&self, data: &DataPoint, row: usize) -> Result<JobOutput> {
			match (self.f)(data, row).await {
				Ok(output) => Ok(JobOutput::new(self.name.clone(), output)),
				Err(err) if err.is::<JobError>() => Err(err),
				Err(err) => Err(JobError::new(self.name.clone(), err).into()),
			}
		}

		fn name(&self) -> Option<&str> {
			Some(&self.name)
		}
	}

	Arc::new(NamedJob { name: name.into(), f })
}
