//! Remote, paginated data sources.
//!
//! The runner pulls pages through [`DatasetProvider::fetch_batch`] and starts
//! evaluating each page's data points as soon as it arrives.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{ApiCredentials, DatasetConfig};
use crate::error::EvaluatorqError;
use crate::DataPoint;

/// One page of a remote dataset.
#[derive(Debug, Clone, Default)]
pub struct DatasetPage {
    pub items: Vec<DataPoint>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[async_trait]
pub trait DatasetProvider: Send + Sync {
    /// Fetch the page starting after `cursor` (`None` for the first page).
    async fn fetch_batch(&self, cursor: Option<&str>) -> Result<DatasetPage>;
}

/// Pages through `GET {base}/v2/datasets/{id}/datapoints`.
pub struct HttpDatasetProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    dataset_id: String,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
struct DatapointList {
    #[serde(default)]
    data: Vec<RemoteDatapoint>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct RemoteDatapoint {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    inputs: Map<String, Value>,
    #[serde(default)]
    expected_output: Option<Value>,
}

impl HttpDatasetProvider {
    pub fn new(credentials: &ApiCredentials, dataset: &DatasetConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            dataset_id: dataset.id.clone(),
            page_size: dataset.page_size.max(1),
        }
    }
}

#[async_trait]
impl DatasetProvider for HttpDatasetProvider {
    async fn fetch_batch(&self, cursor: Option<&str>) -> Result<DatasetPage> {
        let url = format!("{}/v2/datasets/{}/datapoints", self.base_url, self.dataset_id);
        let mut query = vec![("limit", self.page_size.to_string())];
        if let Some(cursor) = cursor {
            query.push(("starting_after", cursor.to_string()));
        }

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&query)
            .send()
            .await
            .map_err(EvaluatorqError::from)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EvaluatorqError::DatasetFetch { status: status.as_u16(), message }.into());
        }

        let list: DatapointList = resp.json().await.map_err(EvaluatorqError::from)?;
        let next_cursor = list.data.last().map(|dp| dp.id.clone());
        debug!(dataset = %self.dataset_id, items = list.data.len(), has_more = list.has_more, "fetched dataset page");

        Ok(DatasetPage {
            items: list
                .data
                .into_iter()
                .map(|dp| DataPoint { inputs: dp.inputs, expected_output: dp.expected_output })
                .collect(),
            has_more: list.has_more && next_cursor.is_some(),
            next_cursor,
        })
    }
}
