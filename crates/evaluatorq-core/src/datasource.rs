use std::fmt;
use std::future::Future;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::DataPoint;

/// One entry of an in-memory data source. Entries may still be pending and
/// may fail when resolved; failures are recorded on that row only.
pub enum DataPointSource {
    Ready(DataPoint),
    Pending(BoxFuture<'static, Result<DataPoint>>),
    Failed(String),
}

impl DataPointSource {
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = Result<DataPoint>> + Send + 'static,
    {
        DataPointSource::Pending(fut.boxed())
    }

    pub async fn resolve(self) -> Result<DataPoint> {
        match self {
            DataPointSource::Ready(dp) => Ok(dp),
            DataPointSource::Pending(fut) => fut.await,
            DataPointSource::Failed(message) => Err(anyhow!(message)),
        }
    }
}

impl From<DataPoint> for DataPointSource {
    fn from(dp: DataPoint) -> Self {
        DataPointSource::Ready(dp)
    }
}

impl fmt::Debug for DataPointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataPointSource::Ready(dp) => f.debug_tuple("Ready").field(dp).finish(),
            DataPointSource::Pending(_) => f.write_str("Pending(..)"),
            DataPointSource::Failed(message) => f.debug_tuple("Failed").field(message).finish(),
        }
    }
}

/// A finite, up-front source of data points.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self) -> Result<Vec<DataPointSource>>;
}

pub struct VecDataSource {
    points: Vec<DataPoint>,
}

impl VecDataSource {
    pub fn new(points: Vec<DataPoint>) -> Self {
        Self { points }
    }
}

#[async_trait]
impl DataSource for VecDataSource {
    async fn load(&self) -> Result<Vec<DataPointSource>> {
        Ok(self.points.iter().cloned().map(DataPointSource::Ready).collect())
    }
}

/// Read JSONL where each line is
/// `{"inputs": {...}, "expected_output"?: ...}`.
///
/// A line that does not parse becomes a failed entry for its row instead of
/// aborting the load. Blank lines are skipped.
pub struct JsonlDataSource {
    path: PathBuf,
}

impl JsonlDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for JsonlDataSource {
    async fn load(&self) -> Result<Vec<DataPointSource>> {
        let content = tokio_fs_read_to_string(&self.path).await?;
        let mut points = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(dp) => points.push(DataPointSource::Ready(dp)),
                Err(err) => points.push(DataPointSource::Failed(format!("line {}: {}", idx + 1, err))),
            }
        }
        Ok(points)
    }
}

fn parse_line(line: &str) -> Result<DataPoint> {
    let value: Value = serde_json::from_str(line).context("invalid JSON")?;
    let obj = value.as_object().ok_or_else(|| anyhow!("expected object"))?;
    if !obj.contains_key("inputs") {
        return Err(anyhow!("missing 'inputs'"));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(not(feature = "sync-fs"))]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use tokio::fs;
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

#[cfg(feature = "sync-fs")]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use std::fs;
    use tokio::task;
    let path_clone = path.clone();
    let content = task::spawn_blocking(move || {
        fs::read_to_string(&path_clone).with_context(|| format!("Failed to read {:?}", path_clone))
    })
    .await
    .map_err(|e| anyhow!(e))??;
    Ok(content)
}
