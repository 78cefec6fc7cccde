use thiserror::Error;

/// Errors surfaced by the engine itself, as opposed to failures captured
/// inside the result tree.
#[derive(Debug, Error)]
pub enum EvaluatorqError {
    #[error("ORQ_API_KEY is not set; it is required to {0}")]
    MissingApiKey(&'static str),

    #[error("no data source configured")]
    MissingDataSource,

    #[error("at least one job is required")]
    NoJobs,

    #[error("failed to load data source: {0}")]
    DataLoad(String),

    #[error("dataset fetch failed (HTTP {status}): {message}")]
    DatasetFetch { status: u16, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A job failure that remembers which job raised it.
///
/// Produced by [`crate::job::job`] so the job name survives the failure; the
/// runner recovers it with `anyhow::Error::downcast_ref`.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct JobError {
    pub job_name: String,
    cause: anyhow::Error,
}

impl JobError {
    pub fn new(job_name: impl Into<String>, cause: anyhow::Error) -> Self {
        Self { job_name: job_name.into(), cause }
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

/// Name recorded for failed jobs that never identified themselves.
pub const UNKNOWN_JOB: &str = "Unknown";

/// Job name attached to `err`, if any.
pub fn job_name_of(err: &anyhow::Error) -> Option<&str> {
    err.downcast_ref::<JobError>().map(|e| e.job_name.as_str())
}
