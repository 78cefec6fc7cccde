use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::evaluator::Evaluator;
use crate::{DataPoint, ScoreResult};

enum Mode {
	/// Output must be JSON; string outputs are parsed.
	Valid,
	Schema(JSONSchema),
	/// Same keys and value types as `expected_output`.
	Strict,
}

/// Validates JSON output, optionally against a schema or the expected shape.
pub struct JsonEvaluator {
	mode: Mode,
}

impl JsonEvaluator {
	pub fn new() -> Self {
		Self { mode: Mode::Valid }
	}

	pub fn with_schema(schema: Value) -> Result<Self> {
		let compiled = JSONSchema::compile(&schema).map_err(|e| anyhow!("Invalid JSON schema: {}", e))?;
		Ok(Self { mode: Mode::Schema(compiled) })
	}

	pub fn strict() -> Self {
		Self { mode: Mode::Strict }
	}
}

impl Default for JsonEvaluator {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Evaluator for JsonEvaluator {
	fn name(&self) -> &str {
		match self.mode {
			Mode::Valid => "json",
			Mode::Schema(_) => "json_schema",
			Mode::Strict => "json_structure",
		}
	}

	async fn score(&self, data: &DataPoint, output: &Value) -> Result<ScoreResult> {
		let parsed = match output {
			Value::String(s) => match serde_json::from_str::<Value>(s) {
				Ok(v) => v,
				Err(e) => {
					return Ok(ScoreResult::new(false).with_pass(false).with_explanation(format!("not valid JSON: {e}")))
				}
			},
			other => other.clone(),
		};

		match &self.mode {
			Mode::Valid => Ok(ScoreResult::new(true).with_pass(true)),
			Mode::Schema(schema) => {
				let outcome = match schema.validate(&parsed) {
					Ok(()) => ScoreResult::new(true).with_pass(true),
					Err(errors) => {
						let messages: Vec<String> = errors.map(|e| format!("{}: {}", e.instance_path, e)).collect();
						ScoreResult::new(false).with_pass(false).with_explanation(messages.join("; "))
					}
				};
				Ok(outcome)
			}
			Mode::Strict => {
				let expected = data
					.expected_output
					.as_ref()
					.ok_or_else(|| anyhow!("data point has no expected_output"))?;
				let matches = same_shape(expected, &parsed);
				Ok(ScoreResult::new(matches).with_pass(matches))
			}
		}
	}
}

/// Keys and value types match; values themselves may differ.
fn same_shape(expected: &Value, actual: &Value) -> bool {
	match (expected, actual) {
		(Value::Object(e), Value::Object(a)) => {
			e.len() == a.len() && e.iter().all(|(key, ev)| a.get(key).is_some_and(|av| same_shape(ev, av)))
		}
		(Value::Array(e), Value::Array(a)) => e.len() == a.len() && e.iter().zip(a).all(|(ev, av)| same_shape(ev, av)),
		(Value::String(_), Value::String(_))
		| (Value::Number(_), Value::Number(_))
		| (Value::Bool(_), Value::Bool(_))
		| (Value::Null, Value::Null) => true,
		_ => false,
	}
}
