//! OpenNeuro source implementation.
//!
//! Uses the OpenNeuro GraphQL API with cursor pagination.
//! API documentation: <https://docs.openneuro.org/api.html>
//!
//! | record field | GraphQL path |
//! |---|---|
//! | `id` | `id` |
//! | `name` | `name`, else `draft.description.Name` |
//! | `description` | `draft.readme` |
//! | `modalities` | `draft.summary.modalities` + `draft.summary.primaryModality` |
//! | `n_subjects` | length of `draft.summary.subjects` |
//! | `tasks` | `draft.summary.tasks` |
//! | `doi`, `license`, `authors` | `draft.description.{DatasetDOI, License, Authors}` |
//! | `size_bytes` | `draft.summary.size` |
//! | `downloads`, `views` | `analytics.{downloads, views}` |

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::models::{
    DataFormat, DatasetBuilder, DatasetRecord, FetchRequest, SearchResponse, SourceType,
};
use crate::sources::normalize::{as_u64, lenient, lenient_strings, PageCollector};
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::{api_retry_config, with_retry, HttpClient, RetryConfig};

const OPENNEURO_GRAPHQL_URL: &str = "https://openneuro.org/crn/graphql";
const OPENNEURO_DATASET_URL: &str = "https://openneuro.org/datasets";
const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_PAGE_SIZE: usize = 100;

const NODE_FIELDS: &str = "
    id
    name
    created
    analytics { views downloads }
    draft {
      modified
      readme
      description { Name BIDSVersion License Authors DatasetDOI }
      summary { modalities primaryModality sessions subjects tasks size totalFiles }
    }";

fn datasets_query() -> String {
    format!(
        "query Datasets($first: Int!, $after: String) {{
  datasets(first: $first, after: $after) {{
    edges {{ node {{ {} }} }}
    pageInfo {{ hasNextPage endCursor }}
  }}
}}",
        NODE_FIELDS
    )
}

fn dataset_query() -> String {
    format!(
        "query Dataset($id: ID!) {{ dataset(id: $id) {{ {} }} }}",
        NODE_FIELDS
    )
}

/// OpenNeuro source
///
/// Lists BIDS datasets through the public GraphQL endpoint. No API key is
/// needed for public datasets. OpenNeuro has no full-text search endpoint,
/// so `search` scans the listing.
#[derive(Debug, Clone)]
pub struct OpenNeuroSource {
    client: Arc<HttpClient>,
    endpoint: String,
    retry: RetryConfig,
}

impl OpenNeuroSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_endpoint(OPENNEURO_GRAPHQL_URL)
    }

    /// Create a source talking to another GraphQL endpoint (mirrors, tests)
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, SourceError> {
        Ok(Self {
            client: Arc::new(HttpClient::new()?),
            endpoint: endpoint.into(),
            retry: api_retry_config(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            client: Arc::new(HttpClient::with_settings(&config.http_settings())?),
            endpoint: config.sources.endpoints.openneuro.clone(),
            retry: config.retry_config(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post_graphql<T>(&self, query: String, variables: Value) -> Result<T, SourceError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let body = json!({ "query": query, "variables": variables });
        let client = Arc::clone(&self.client);
        let endpoint = self.endpoint.clone();

        let response: GraphQlResponse<T> = with_retry(self.retry, || {
            let client = Arc::clone(&client);
            let endpoint = endpoint.clone();
            let body = body.clone();
            async move { client.post(&endpoint).json(&body).send_json().await }
        })
        .await?;

        if !response.errors.is_empty() {
            let messages = response
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if response.data.is_none() {
                return Err(SourceError::MalformedResponse(format!(
                    "OpenNeuro GraphQL error: {}",
                    messages
                )));
            }
            tracing::warn!("OpenNeuro returned partial data with errors: {}", messages);
        }

        response.data.ok_or_else(|| {
            SourceError::MalformedResponse("OpenNeuro response has no data".to_string())
        })
    }
}

#[async_trait]
impl Source for OpenNeuroSource {
    fn id(&self) -> &str {
        "openneuro"
    }

    fn name(&self) -> &str {
        "OpenNeuro"
    }

    fn source_type(&self) -> SourceType {
        SourceType::OpenNeuro
    }

    fn description(&self) -> &str {
        "Open platform for sharing BIDS-formatted MRI, MEG, EEG, iEEG and PET data"
    }

    fn homepage(&self) -> &str {
        "https://openneuro.org"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FETCH | SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<SearchResponse, SourceError> {
        if request.is_empty_request() {
            return Ok(SearchResponse::new(Vec::new(), self.id(), ""));
        }

        let page_size = request.effective_page_size(DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
        let mut collector = PageCollector::new(SourceType::OpenNeuro, request);
        let mut cursor: Option<String> = None;
        let mut has_more;
        let mut pages = 0usize;

        loop {
            let data: DatasetsData = self
                .post_graphql(datasets_query(), json!({ "first": page_size, "after": cursor }))
                .await?;
            let connection = data.datasets.ok_or_else(|| {
                SourceError::MalformedResponse("OpenNeuro response has no datasets".to_string())
            })?;
            pages += 1;

            for edge in connection.edges {
                if let Some(node) = edge.node {
                    collector.push_raw(node);
                }
            }

            let page_info = connection.page_info.unwrap_or_default();
            has_more = page_info.has_next_page;
            tracing::debug!(
                "OpenNeuro page {}: {} datasets seen, has_next_page={}",
                pages,
                collector.seen(),
                has_more
            );

            if collector.is_full() || !has_more {
                break;
            }
            match page_info.end_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => {
                    tracing::warn!("OpenNeuro pagination cursor did not advance; stopping");
                    break;
                }
            }
        }

        let datasets = collector.into_records();
        tracing::info!("Fetched {} datasets from OpenNeuro", datasets.len());
        Ok(SearchResponse::new(datasets, self.id(), "").has_more(has_more))
    }

    async fn get_by_id(&self, id: &str) -> Result<DatasetRecord, SourceError> {
        self.validate_id(id)?;

        let data: DatasetData = self
            .post_graphql(dataset_query(), json!({ "id": id }))
            .await?;
        match data.dataset {
            Some(node) if !node.is_null() => normalize(node),
            _ => Err(SourceError::NotFound(format!("openneuro:{}", id))),
        }
    }

    fn validate_id(&self, id: &str) -> Result<(), SourceError> {
        let id = id.trim();
        let valid = id.len() > 2
            && id.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("ds"))
            && id[2..].chars().all(|c| c.is_ascii_digit());
        if !valid {
            return Err(SourceError::InvalidArgument(format!(
                "invalid OpenNeuro accession '{}' (expected e.g. ds000001)",
                id
            )));
        }
        Ok(())
    }
}

/// Map one GraphQL `Dataset` node to a record
pub(crate) fn normalize(raw: Value) -> Result<DatasetRecord, SourceError> {
    let node: Node = serde_json::from_value(raw.clone())?;
    let id = node
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| SourceError::MalformedResponse("OpenNeuro dataset without id".to_string()))?;

    let draft = node.draft.unwrap_or_default();
    let description = draft.description.unwrap_or_default();
    let summary = draft.summary.unwrap_or_default();
    let analytics = node.analytics.unwrap_or_default();

    let name = node
        .name
        .filter(|n| !n.trim().is_empty())
        .or(description.name)
        .unwrap_or_else(|| id.clone());

    // The summary's subjects list holds one entry per subject across the
    // whole study; sessions are listed separately and not counted here.
    let n_subjects = summary.subjects.map(|s| s.len() as u64);

    let mut builder = DatasetBuilder::new(
        id.clone(),
        SourceType::OpenNeuro,
        name,
        DataFormat::Bids,
        format!("{}/{}", OPENNEURO_DATASET_URL, id),
    )
    .modalities(summary.modalities.unwrap_or_default())
    .modalities(summary.primary_modality)
    .n_subjects(n_subjects)
    .tasks(summary.tasks.unwrap_or_default())
    .authors(description.authors.unwrap_or_default())
    .doi(description.dataset_doi)
    .license(description.license)
    .created(node.created)
    .modified(draft.modified)
    .size_bytes(summary.size.as_ref().and_then(as_u64))
    .downloads(analytics.downloads.as_ref().and_then(as_u64))
    .views(analytics.views.as_ref().and_then(as_u64));

    if let Some(readme) = draft.readme {
        builder = builder.description(readme);
    }

    Ok(builder.raw(raw).build())
}

// ---- GraphQL response types ----

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DatasetsData {
    datasets: Option<Connection>,
}

#[derive(Debug, Deserialize)]
struct DatasetData {
    dataset: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    #[serde(default)]
    edges: Vec<Edge>,
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Node {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    created: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    analytics: Option<Analytics>,
    #[serde(default, deserialize_with = "lenient")]
    draft: Option<Draft>,
}

#[derive(Debug, Default, Deserialize)]
struct Analytics {
    views: Option<Value>,
    downloads: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Draft {
    #[serde(default, deserialize_with = "lenient")]
    modified: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    readme: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    description: Option<Description>,
    #[serde(default, deserialize_with = "lenient")]
    summary: Option<Summary>,
}

#[derive(Debug, Default, Deserialize)]
struct Description {
    #[serde(rename = "Name", default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(rename = "License", default, deserialize_with = "lenient")]
    license: Option<String>,
    #[serde(rename = "Authors", default, deserialize_with = "lenient_strings")]
    authors: Option<Vec<String>>,
    #[serde(rename = "DatasetDOI", default, deserialize_with = "lenient")]
    dataset_doi: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    #[serde(default, deserialize_with = "lenient_strings")]
    modalities: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    primary_modality: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    subjects: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient_strings")]
    tasks: Option<Vec<String>>,
    size: Option<Value>,
}
