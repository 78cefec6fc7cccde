//! Consumers of a finished run. The runner logs sink failures and moves on;
//! a sink can never change the outcome of a run.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::config::ApiCredentials;
use crate::report::generate_html_report;
use crate::{results_table, RunReport};

#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;
    async fn publish(&self, report: &RunReport) -> Result<()>;
}

/// Prints the per-row results and the summary to stdout.
pub struct TableSink;

#[async_trait]
impl ResultSink for TableSink {
    fn name(&self) -> &str {
        "table"
    }

    async fn publish(&self, report: &RunReport) -> Result<()> {
        write_tables(&mut std::io::stdout().lock(), report).context("Failed to print results")
    }
}

/// A closed stdout surfaces as an error here rather than a panic.
fn write_tables(out: &mut impl Write, report: &RunReport) -> std::io::Result<()> {
    writeln!(out, "{}", report.name)?;
    if let Some(description) = &report.description {
        writeln!(out, "{}", description)?;
    }
    writeln!(out, "{}", results_table(&report.results))?;
    writeln!(out, "{}", report.summary.summary_table())?;
    out.flush()
}

pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn publish(&self, report: &RunReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {:?}", self.path))
    }
}

pub struct HtmlReportSink {
    path: PathBuf,
}

impl HtmlReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResultSink for HtmlReportSink {
    fn name(&self) -> &str {
        "html_report"
    }

    async fn publish(&self, report: &RunReport) -> Result<()> {
        tokio::fs::write(&self.path, generate_html_report(report))
            .await
            .with_context(|| format!("Failed to write {:?}", self.path))
    }
}

/// Sends the finished run to the remote platform.
pub struct HttpResultUploader {
    client: reqwest::Client,
    credentials: ApiCredentials,
}

impl HttpResultUploader {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { client: reqwest::Client::new(), credentials }
    }

    fn url(&self) -> String {
        format!("{}/v2/evaluators/evaluatorq/results", self.credentials.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ResultSink for HttpResultUploader {
    fn name(&self) -> &str {
        "upload"
    }

    async fn publish(&self, report: &RunReport) -> Result<()> {
        let body = json!({
            "name": report.name,
            "description": report.description,
            "results": report.results,
            "summary": report.summary,
            "duration_ms": report.duration_ms,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        let resp = self
            .client
            .post(self.url())
            .bearer_auth(&self.credentials.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("upload rejected (HTTP {}): {}", status.as_u16(), text);
        }
        Ok(())
    }
}

/// Persists runs to SQLite.
#[cfg(feature = "persistence")]
pub struct StoreSink {
    store: evaluatorq_store::Store,
}

#[cfg(feature = "persistence")]
impl StoreSink {
    pub fn new(store: evaluatorq_store::Store) -> Self {
        Self { store }
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(evaluatorq_store::Store::open(path)?))
    }
}

#[cfg(feature = "persistence")]
#[async_trait]
impl ResultSink for StoreSink {
    fn name(&self) -> &str {
        "store"
    }

    async fn publish(&self, report: &RunReport) -> Result<()> {
        let store = self.store.clone();
        let report = report.clone();
        let run_id = tokio::task::spawn_blocking(move || store.save_run(&report)).await??;
        tracing::debug!(run_id, "run persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataPoint, DataPointResult, JobResult};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn report() -> RunReport {
        let results = vec![DataPointResult {
            data_point: DataPoint::new(json!({"x": 1})),
            error: None,
            job_results: Some(vec![JobResult {
                job_name: "double".into(),
                output: json!(2),
                error: None,
                evaluator_scores: Some(vec![]),
            }]),
        }];
        RunReport::new("unit", results, 5)
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tables_are_written_to_the_writer() {
        let mut out = Vec::new();
        write_tables(&mut out, &report()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("unit\n"));
        assert!(text.contains("double"));
    }

    #[test]
    fn closed_output_is_an_error_not_a_panic() {
        let err = write_tables(&mut ClosedPipe, &report()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn json_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        JsonFileSink::new(&path).publish(&report()).await.unwrap();

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["name"], "unit");
        assert_eq!(written["results"][0]["job_results"][0]["output"], 2);
    }

    #[tokio::test]
    async fn uploader_posts_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/evaluators/evaluatorq/results"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let uploader = HttpResultUploader::new(ApiCredentials { api_key: "secret".into(), base_url: server.uri() });
        uploader.publish(&report()).await.unwrap();
    }

    #[tokio::test]
    async fn uploader_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let uploader = HttpResultUploader::new(ApiCredentials { api_key: "k".into(), base_url: server.uri() });
        let err = uploader.publish(&report()).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[cfg(feature = "persistence")]
    #[tokio::test]
    async fn store_sink_persists_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = evaluatorq_store::Store::open(dir.path().join("runs.db")).unwrap();
        StoreSink::new(store.clone()).publish(&report()).await.unwrap();
        assert_eq!(store.list_runs().unwrap().len(), 1);
    }
}
