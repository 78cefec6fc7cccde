use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::evaluator::Evaluator;
use crate::{DataPoint, ScoreResult};

/// Checks if output contains a substring.
pub struct ContainsEvaluator {
    substring: String,
    case_sensitive: bool,
}

impl ContainsEvaluator {
    pub fn new(substring: impl Into<String>) -> Self {
        Self {
            substring: substring.into(),
            case_sensitive: true,
        }
    }

    pub fn case_insensitive(substring: impl Into<String>) -> Self {
        Self {
            substring: substring.into(),
            case_sensitive: false,
        }
    }
}

#[async_trait]
impl Evaluator for ContainsEvaluator {
    fn name(&self) -> &str {
        "contains"
    }

    async fn score(&self, _data: &DataPoint, output: &Value) -> Result<ScoreResult> {
        let text = super::output_text(output)?;
        let found = if self.case_sensitive {
            text.contains(&self.substring)
        } else {
            text.to_lowercase().contains(&self.substring.to_lowercase())
        };

        let verb = if found { "contains" } else { "does not contain" };
        Ok(ScoreResult::new(found)
            .with_pass(found)
            .with_explanation(format!("output {verb} {:?}", self.substring)))
    }
}
