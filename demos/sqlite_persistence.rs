// Persisting runs to SQLite and reading them back.
//
// To run from the workspace root:
//   cargo run -p evaluatorq-core --features persistence --example sqlite_persistence

use std::sync::Arc;

use evaluatorq_core::*;
use evaluatorq_store::Store;
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let db_path = "evaluatorq_history.db";
    println!("Opening SQLite store at '{}'...", db_path);
    let store = Store::open(db_path)?;

    let greet = job("greet", |data: &DataPoint, _row| {
        let name = data.input("name").and_then(Value::as_str).unwrap_or("stranger").to_string();
        async move { Ok(json!(format!("Hello, {name}!"))) }
    });

    Evaluatorq::builder("greetings")
        .data([
            DataPoint::new(json!({"name": "Ada"})).with_expected(json!("Hello, Ada!")),
            DataPoint::new(json!({"name": "Linus"})).with_expected(json!("Hi, Linus!")),
        ])
        .job(greet)
        .evaluator(Arc::new(LevenshteinEvaluator::new(0.8)))
        .sink(Arc::new(StoreSink::new(store.clone())))
        .build()?
        .run()
        .await?;

    for run in store.list_runs()? {
        println!("#{} {} {} ({} ms, {})", run.id, run.created_at, run.name, run.duration_ms, run.outcome);
    }
    if let Some(latest) = store.list_runs()?.first() {
        let report = store.load_run(latest.id)?;
        println!("{}", results_table(&report.results));
    }

    println!("\nInspect with: sqlite3 {} 'select * from evaluator_scores;'", db_path);
    Ok(())
}
