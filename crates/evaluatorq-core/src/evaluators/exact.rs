use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::evaluator::Evaluator;
use crate::{DataPoint, ScoreResult};

/// Passes when the output equals the data point's `expected_output`.
pub struct ExactMatchEvaluator;

#[async_trait]
impl Evaluator for ExactMatchEvaluator {
	fn name(&self) -> &str {
		"exact_match"
	}

	async fn score(&self, data: &DataPoint, output: &Value) -> Result<ScoreResult> {
		let expected = data
			.expected_output
			.as_ref()
			.ok_or_else(|| anyhow::anyhow!("data point has no expected_output"))?;
		let passed = expected == output;
		Ok(ScoreResult::new(passed).with_pass(passed))
	}
}
