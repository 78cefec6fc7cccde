use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::EvaluatorqError;

pub const API_KEY_ENV: &str = "ORQ_API_KEY";
pub const BASE_URL_ENV: &str = "ORQ_BASE_URL";
pub const PARALLELISM_ENV: &str = "EVALUATORQ_PARALLELISM";
pub const DEFAULT_BASE_URL: &str = "https://my.orq.ai";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorqConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Per-call deadline for jobs and evaluators. None waits forever.
    #[serde(default)]
    pub job_timeout_ms: Option<u64>,
    #[serde(default = "default_print")]
    pub print: bool,
    #[serde(default)]
    pub dataset: Option<DatasetConfig>,
    #[serde(default)]
    pub upload: bool,
}

fn default_name() -> String {
    "evaluatorq".to_string()
}

fn default_parallelism() -> usize {
    1
}

fn default_print() -> bool {
    true
}

impl Default for EvaluatorqConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            description: None,
            parallelism: default_parallelism(),
            job_timeout_ms: None,
            print: default_print(),
            dataset: None,
            upload: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    50
}

impl EvaluatorqConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EvaluatorqError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        config.validated()
    }

    /// Apply `EVALUATORQ_PARALLELISM` from the environment.
    pub fn with_env_overrides(self) -> Result<Self, EvaluatorqError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, EvaluatorqError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(PARALLELISM_ENV) {
            self.parallelism = raw
                .trim()
                .parse()
                .map_err(|_| EvaluatorqError::Config(format!("{PARALLELISM_ENV} must be a positive integer, got {raw:?}")))?;
        }
        self.validated()
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }

    fn validated(mut self) -> Result<Self, EvaluatorqError> {
        self.parallelism = self.parallelism.max(1);
        if let Some(dataset) = &self.dataset {
            if dataset.id.trim().is_empty() {
                return Err(EvaluatorqError::Config("dataset.id must not be empty".into()));
            }
        }
        Ok(self)
    }
}

/// Credentials for the remote platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCredentials {
    pub api_key: String,
    pub base_url: String,
}

impl ApiCredentials {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty())?;
        let base_url = lookup(BASE_URL_ENV)
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Some(Self { api_key, base_url })
    }
}
