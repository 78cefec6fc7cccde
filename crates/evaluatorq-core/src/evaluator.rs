use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::{DataPoint, ScoreResult};

/// Grades a job's output against the data point it was produced from.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;
    async fn score(&self, data: &DataPoint, output: &Value) -> Result<ScoreResult>;
}

/// Wrap an async closure as a named `Evaluator`.
pub fn evaluator<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Evaluator>
where
    F: Fn(&DataPoint, &Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ScoreResult>> + Send + 'static,
{
    struct ClosureEvaluator<F> {
        name: String,
        f: F,
    }

    #[async_trait]
    impl<F, Fut> Evaluator for ClosureEvaluator<F>
    where
        F: Fn(&DataPoint, &Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ScoreResult>> + Send + 'static,
    {
        fn name(&self) -> &str {
            &self.name
        }

        async fn score(&self, data: &DataPoint, output: &Value) -> Result<ScoreResult> {
            (self.f)(data, output).await
        }
    }

    Arc::new(ClosureEvaluator { name: name.into(), f })
}
