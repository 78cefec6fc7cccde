use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use crate::evaluator::Evaluator;
use crate::{DataPoint, ScoreResult, ScoreValue};

/// Checks if output matches a regex pattern. Capture groups are reported as
/// a structured value.
pub struct RegexEvaluator {
	pattern: Regex,
}

impl RegexEvaluator {
	pub fn new(pattern: &str) -> Result<Self> {
		Ok(Self { pattern: Regex::new(pattern)? })
	}
}

#[async_trait]
impl Evaluator for RegexEvaluator {
	fn name(&self) -> &str {
		"regex"
	}

	async fn score(&self, _data: &DataPoint, output: &Value) -> Result<ScoreResult> {
		let text = super::output_text(output)?;
		let Some(caps) = self.pattern.captures(&text) else {
			return Ok(ScoreResult::new(false)
				.with_pass(false)
				.with_explanation(format!("no match for /{}/", self.pattern.as_str())));
		};

		let mut groups = Map::new();
		for (i, m) in caps.iter().enumerate() {
			if let Some(m) = m {
				groups.insert(i.to_string(), Value::String(m.as_str().to_string()));
			}
		}
		for name in self.pattern.capture_names().flatten() {
			if let Some(m) = caps.name(name) {
				groups.insert(name.to_string(), Value::String(m.as_str().to_string()));
			}
		}
		Ok(ScoreResult::new(ScoreValue::Structured(groups)).with_pass(true))
	}
}
