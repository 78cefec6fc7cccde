// Quickstart: two jobs, three data points (one of them broken), two evaluators.
//
// To run from the workspace root:
//   cargo run -p evaluatorq-core --example quickstart

use std::sync::Arc;
use std::time::Duration;

use evaluatorq_core::*;
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Your agent
    async fn capital_of(country: &str) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        match country {
            "France" => Ok("Paris".into()),
            "Germany" => Ok("Berlin".into()),
            other => anyhow::bail!("no idea about {other}"),
        }
    }

    let answer = job("capital", |data: &DataPoint, _row| {
        let country = data.input("country").and_then(Value::as_str).unwrap_or_default().to_string();
        async move { Ok(json!(capital_of(&country).await?)) }
    });
    let shout = job("shout", |data: &DataPoint, _row| {
        let country = data.input("country").and_then(Value::as_str).unwrap_or_default().to_uppercase();
        async move { Ok(json!(country)) }
    });

    let short_enough = evaluator("short_enough", |_data: &DataPoint, output: &Value| {
        let len = output.as_str().map(str::len).unwrap_or(0);
        async move { Ok(ScoreResult::new(len as f64).with_pass(len <= 10)) }
    });

    let data: Vec<DataPointSource> = vec![
        DataPoint::new(json!({"country": "France"})).with_expected(json!("Paris")).into(),
        DataPointSource::pending(async { anyhow::bail!("row could not be loaded") }),
        DataPoint::new(json!({"country": "Germany"})).with_expected(json!("Berlin")).into(),
    ];

    let eval = Evaluatorq::builder("capitals")
        .description("Capital cities, two ways")
        .data(data)
        .jobs([answer, shout])
        .evaluators([Arc::new(ExactMatchEvaluator) as Arc<dyn Evaluator>, short_enough])
        .parallelism(2)
        .build()?;

    let mut progress = eval.progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state = progress.borrow().clone();
            if state.phase == Phase::Completed {
                break;
            }
        }
    });

    let report = eval.run().await?;
    println!("Outcome: {:?}", report.outcome());
    Ok(())
}
