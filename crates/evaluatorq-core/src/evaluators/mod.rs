//! Ready-made evaluators for common checks.

pub mod contains;
pub mod exact;
pub mod json;
pub mod levenshtein;
pub mod regex;

use anyhow::Result;
use serde_json::Value;

/// Strings as-is, everything else as compact JSON.
fn output_text(output: &Value) -> Result<String> {
    Ok(match output {
        Value::String(s) => s.clone(),
        _ => serde_json::to_string(output)?,
    })
}
