use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use strsim::levenshtein;

use crate::evaluator::Evaluator;
use crate::{DataPoint, ScoreResult};

/// Normalised edit-distance similarity against `expected_output`.
pub struct LevenshteinEvaluator {
    pub min_similarity: f64,
}

impl LevenshteinEvaluator {
    pub fn new(min_similarity: f64) -> Self {
        Self { min_similarity }
    }
}

#[async_trait]
impl Evaluator for LevenshteinEvaluator {
    fn name(&self) -> &str {
        "levenshtein"
    }

    async fn score(&self, data: &DataPoint, output: &Value) -> Result<ScoreResult> {
        let expected = data
            .expected_output
            .as_ref()
            .ok_or_else(|| anyhow!("data point has no expected_output"))?;
        let e = stringify(expected);
        let o = stringify(output);
        let max_len = e.chars().count().max(o.chars().count()).max(1) as f64;
        let similarity = 1.0 - (levenshtein(&e, &o) as f64 / max_len);
        Ok(ScoreResult::new(similarity)
            .with_pass(similarity >= self.min_similarity)
            .with_explanation(format!("similarity {:.3}, threshold {:.3}", similarity, self.min_similarity)))
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        _ => v.to_string(),
    }
}
