// Streaming a paginated dataset: pages are evaluated as they arrive.
//
// With ORQ_API_KEY set, pass a dataset id to read a real platform dataset:
//   cargo run -p evaluatorq-core --example dataset_streaming -- <dataset-id>
// Without arguments a local in-memory provider is used.

use std::sync::Arc;

use async_trait::async_trait;
use evaluatorq_core::*;
use serde_json::{json, Value};

/// Serves `total` numbers, `page_size` at a time.
struct Numbers {
    total: usize,
    page_size: usize,
}

#[async_trait]
impl DatasetProvider for Numbers {
    async fn fetch_batch(&self, cursor: Option<&str>) -> anyhow::Result<DatasetPage> {
        let start = cursor.map(str::parse::<usize>).transpose()?.unwrap_or(0);
        let end = (start + self.page_size).min(self.total);
        let items = (start..end)
            .map(|n| DataPoint::new(json!({ "n": n })).with_expected(json!(n * n)))
            .collect();
        Ok(DatasetPage { items, next_cursor: Some(end.to_string()), has_more: end < self.total })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let square = job("square", |data: &DataPoint, _row| {
        let n = data.input("n").and_then(Value::as_u64).unwrap_or_default();
        async move { Ok(json!(n * n)) }
    });

    let builder = Evaluatorq::builder("squares")
        .job(square)
        .evaluator(Arc::new(ExactMatchEvaluator))
        .parallelism(4);

    let builder = match std::env::args().nth(1) {
        Some(id) => builder.remote_dataset(DatasetConfig { id, page_size: 50 }),
        None => builder.dataset(Arc::new(Numbers { total: 23, page_size: 5 })),
    };

    let report = builder.build()?.run().await?;
    testing::assert_run_passed(&report)?;
    Ok(())
}
