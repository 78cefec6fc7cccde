use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod summary;

pub use summary::{results_table, run_failed, summarize, EvalSummary, EvaluatorStats, RunOutcome};

/// One unit of evaluation input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
	#[serde(default)]
	pub inputs: Map<String, Value>,
	#[serde(default, skip_serializing_if = "Option::is_none", alias = "expectedOutput")]
	pub expected_output: Option<Value>,
}

impl DataPoint {
	/// Build a data point from a JSON object of inputs.
	/// A non-object value is stored under the `"input"` key.
	pub fn new(inputs: Value) -> Self {
		let inputs = match inputs {
			Value::Object(map) => map,
			other => {
				let mut map = Map::new();
				map.insert("input".to_string(), other);
				map
			}
		};
		Self { inputs, expected_output: None }
	}

	pub fn with_expected(mut self, expected: Value) -> Self {
		self.expected_output = Some(expected);
		self
	}

	pub fn input(&self, key: &str) -> Option<&Value> {
		self.inputs.get(key)
	}

	/// Stand-in used when the real data point could not be resolved.
	pub fn placeholder() -> Self {
		Self::default()
	}
}

/// The value an evaluator assigns to an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
	Boolean(bool),
	Number(f64),
	Text(String),
	Structured(Map<String, Value>),
}

impl ScoreValue {
	/// Numeric view used for averaging. Booleans count as 1.0 / 0.0.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			ScoreValue::Number(n) => Some(*n),
			ScoreValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
			ScoreValue::Text(_) | ScoreValue::Structured(_) => None,
		}
	}
}

impl fmt::Display for ScoreValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ScoreValue::Boolean(b) => write!(f, "{b}"),
			ScoreValue::Number(n) => write!(f, "{n:.3}"),
			ScoreValue::Text(s) => write!(f, "{s}"),
			ScoreValue::Structured(map) => write!(f, "{}", Value::Object(map.clone())),
		}
	}
}

impl From<bool> for ScoreValue {
	fn from(b: bool) -> Self {
		ScoreValue::Boolean(b)
	}
}

impl From<f64> for ScoreValue {
	fn from(n: f64) -> Self {
		ScoreValue::Number(n)
	}
}

impl From<String> for ScoreValue {
	fn from(s: String) -> Self {
		ScoreValue::Text(s)
	}
}

impl From<&str> for ScoreValue {
	fn from(s: &str) -> Self {
		ScoreValue::Text(s.to_string())
	}
}

/// Result of a single evaluator. `pass` is the explicit gate signal and is
/// independent of `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
	pub value: ScoreValue,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub explanation: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pass: Option<bool>,
}

impl ScoreResult {
	pub fn new(value: impl Into<ScoreValue>) -> Self {
		Self { value: value.into(), explanation: None, pass: None }
	}

	pub fn with_pass(mut self, pass: bool) -> Self {
		self.pass = Some(pass);
		self
	}

	pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
		self.explanation = Some(explanation.into());
		self
	}

	/// Neutral score recorded when an evaluator fails.
	pub fn placeholder() -> Self {
		Self { value: ScoreValue::Text(String::new()), explanation: None, pass: None }
	}

	pub fn is_placeholder(&self) -> bool {
		matches!(&self.value, ScoreValue::Text(s) if s.is_empty())
			&& self.explanation.is_none()
			&& self.pass.is_none()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorScore {
	pub evaluator_name: String,
	pub score: ScoreResult,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
	pub job_name: String,
	pub output: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Present only when the job succeeded.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub evaluator_scores: Option<Vec<EvaluatorScore>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPointResult {
	pub data_point: DataPoint,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Absent when the data point itself failed to resolve.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub job_results: Option<Vec<JobResult>>,
}

/// Results of one run, index-aligned with the input data points.
pub type EvaluatorqResult = Vec<DataPointResult>;

/// A finished run as handed to result sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub results: EvaluatorqResult,
	pub summary: EvalSummary,
	pub duration_ms: u64,
}

impl RunReport {
	pub fn new(name: impl Into<String>, results: EvaluatorqResult, duration_ms: u64) -> Self {
		let summary = summarize(&results);
		Self { name: name.into(), description: None, results, summary, duration_ms }
	}

	pub fn outcome(&self) -> RunOutcome {
		RunOutcome::from_results(&self.results)
	}
}
