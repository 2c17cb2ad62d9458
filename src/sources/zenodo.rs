//! Zenodo source implementation.
//!
//! Uses the Zenodo records API restricted to `resource_type.type:dataset`.
//! API documentation: <https://developers.zenodo.org>
//!
//! Zenodo is a general-purpose repository, so modalities and data format are
//! inferred from the title and keywords rather than read from structured
//! metadata. Subject counts are never available.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{
    DatasetBuilder, DatasetRecord, FetchRequest, SearchQuery, SearchResponse, SourceType,
};
use crate::sources::normalize::{as_id, as_u64, infer_format, infer_modalities, strip_html, PageCollector};
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::{api_retry_config, with_retry, HttpClient, RetryConfig};

const ZENODO_API_BASE: &str = "https://zenodo.org/api";
const ZENODO_RECORD_URL: &str = "https://zenodo.org/records";
const DATASET_QUERY: &str = "resource_type.type:dataset";

/// Page size limits: anonymous clients are capped lower than authenticated ones
const ANONYMOUS_MAX_PAGE_SIZE: usize = 25;
const TOKEN_MAX_PAGE_SIZE: usize = 100;

/// Zenodo refuses to page past this many hits
const MAX_RESULT_WINDOW: usize = 10_000;

/// Zenodo source
///
/// Free and usable without an API key; an access token raises the page size.
#[derive(Debug, Clone)]
pub struct ZenodoSource {
    client: Arc<HttpClient>,
    base_url: String,
    access_token: Option<String>,
    retry: RetryConfig,
}

impl ZenodoSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(ZENODO_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        Ok(Self {
            client: Arc::new(HttpClient::new()?),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
            retry: api_retry_config(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            client: Arc::new(HttpClient::with_settings(&config.http_settings())?),
            base_url: config
                .sources
                .endpoints
                .zenodo
                .trim_end_matches('/')
                .to_string(),
            access_token: config
                .api_keys
                .zenodo
                .clone()
                .filter(|t| !t.trim().is_empty()),
            retry: config.retry_config(),
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn max_page_size(&self) -> usize {
        if self.access_token.is_some() {
            TOKEN_MAX_PAGE_SIZE
        } else {
            ANONYMOUS_MAX_PAGE_SIZE
        }
    }

    async fn get_json<T>(&self, url: String) -> Result<T, SourceError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let token = self.access_token.clone();
        with_retry(self.retry, || {
            let client = Arc::clone(&client);
            let url = url.clone();
            let token = token.clone();
            async move {
                let mut request = client.get(&url).header("Accept", "application/json");
                if let Some(token) = &token {
                    request = request.bearer_auth(token);
                }
                request.send_json().await
            }
        })
        .await
    }

    async fn list(
        &self,
        query: Option<&str>,
        request: &FetchRequest,
    ) -> Result<SearchResponse, SourceError> {
        let text = query.unwrap_or_default();
        if request.is_empty_request() {
            return Ok(SearchResponse::new(Vec::new(), self.id(), text));
        }

        let q = match query {
            Some(query) => format!("{} AND ({})", DATASET_QUERY, query),
            None => DATASET_QUERY.to_string(),
        };
        let sort = if query.is_some() { "bestmatch" } else { "mostrecent" };
        let max_page = self.max_page_size();
        let page_size = request.effective_page_size(max_page, max_page);

        let mut collector = PageCollector::new(SourceType::Zenodo, request);
        let mut page = 1usize;
        let mut total = None;
        let mut has_more;

        loop {
            let url = format!(
                "{}/records?q={}&page={}&size={}&sort={}",
                self.base_url,
                urlencoding::encode(&q),
                page,
                page_size,
                sort
            );
            let body: RecordsPage = self.get_json(url).await?;
            let hits = body.hits.unwrap_or_default();
            let page_total = hits.total.as_ref().and_then(Total::value);
            total = page_total.or(total);

            let returned = hits.hits.len();
            for raw in hits.hits {
                collector.push_raw(raw);
            }

            let consumed = page * page_size;
            has_more = returned == page_size && total.map_or(true, |t| consumed < t);
            if collector.is_full() || !has_more {
                break;
            }
            if consumed + page_size > MAX_RESULT_WINDOW {
                tracing::warn!(
                    "Zenodo result window of {} hits reached; narrow the query to see more",
                    MAX_RESULT_WINDOW
                );
                break;
            }
            page += 1;
        }

        let datasets = collector.into_records();
        tracing::info!("Fetched {} datasets from Zenodo", datasets.len());
        let mut response = SearchResponse::new(datasets, self.id(), text).has_more(has_more);
        response.total_results = total;
        Ok(response)
    }
}

#[async_trait]
impl Source for ZenodoSource {
    fn id(&self) -> &str {
        "zenodo"
    }

    fn name(&self) -> &str {
        "Zenodo"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Zenodo
    }

    fn description(&self) -> &str {
        "General-purpose open repository operated by CERN; dataset records only"
    }

    fn homepage(&self) -> &str {
        "https://zenodo.org"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FETCH
            | SourceCapabilities::SEARCH
            | SourceCapabilities::SERVER_SEARCH
            | SourceCapabilities::LOOKUP
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<SearchResponse, SourceError> {
        self.list(None, request).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SourceError> {
        query.validate()?;
        let mut request = FetchRequest::new();
        request.max_results = query.limit;
        self.list(Some(query.query.trim()), &request).await
    }

    async fn get_by_id(&self, id: &str) -> Result<DatasetRecord, SourceError> {
        self.validate_id(id)?;
        let url = format!("{}/records/{}", self.base_url, id.trim());
        let raw: Value = self
            .get_json(url)
            .await
            .map_err(|e| e.or_not_found(|| format!("zenodo:{}", id)))?;
        normalize(raw)
    }

    fn validate_id(&self, id: &str) -> Result<(), SourceError> {
        let id = id.trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(SourceError::InvalidArgument(format!(
                "invalid Zenodo record id '{}' (expected a number, e.g. 1234567)",
                id
            )));
        }
        Ok(())
    }
}

/// Map one Zenodo record to a dataset record
pub(crate) fn normalize(raw: Value) -> Result<DatasetRecord, SourceError> {
    let record: ZenodoRecord = serde_json::from_value(raw.clone())?;
    let id = record
        .id
        .as_ref()
        .or(record.recid.as_ref())
        .and_then(as_id)
        .ok_or_else(|| SourceError::MalformedResponse("Zenodo record without id".to_string()))?;

    let metadata = record.metadata.unwrap_or_default();
    let stats = record.stats.unwrap_or_default();
    let links = record.links.unwrap_or_default();

    let name = metadata
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("Zenodo record {}", id));

    let mut keywords = metadata.keywords.unwrap_or_default();
    keywords.extend(
        metadata
            .subjects
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| s.term.or(s.subject)),
    );

    let texts: Vec<&str> = std::iter::once(name.as_str())
        .chain(keywords.iter().map(String::as_str))
        .collect();
    let modalities = infer_modalities(texts.iter().copied());
    let format = infer_format(texts.iter().copied());

    let files = record.files.unwrap_or_default();
    let size = if files.is_empty() {
        None
    } else {
        Some(files.iter().filter_map(|f| f.size.as_ref().and_then(as_u64)).sum())
    };

    let url = links
        .self_html
        .or(links.html)
        .unwrap_or_else(|| format!("{}/{}", ZENODO_RECORD_URL, id));

    let mut builder = DatasetBuilder::new(id, SourceType::Zenodo, name, format, url)
        .modalities(modalities)
        .keywords(keywords)
        .authors(
            metadata
                .creators
                .unwrap_or_default()
                .into_iter()
                .filter_map(|c| c.name)
                .collect(),
        )
        .doi(record.doi.or(metadata.doi))
        .license(metadata.license.and_then(License::into_id))
        .version(metadata.version)
        .created(record.created.or(metadata.publication_date))
        .modified(record.updated.or(record.modified))
        .size_bytes(size)
        .downloads(
            stats
                .unique_downloads
                .as_ref()
                .or(stats.downloads.as_ref())
                .and_then(as_u64),
        )
        .views(stats.unique_views.as_ref().or(stats.views.as_ref()).and_then(as_u64));

    if let Some(description) = metadata.description {
        builder = builder.description(strip_html(&description));
    }

    Ok(builder.raw(raw).build())
}

// ---- API response types ----

#[derive(Debug, Deserialize)]
struct RecordsPage {
    hits: Option<Hits>,
}

#[derive(Debug, Default, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Value>,
    total: Option<Total>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Total {
    Count(usize),
    Object { value: usize },
}

impl Total {
    fn value(&self) -> Option<usize> {
        match self {
            Total::Count(n) => Some(*n),
            Total::Object { value } => Some(*value),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZenodoRecord {
    id: Option<Value>,
    recid: Option<Value>,
    doi: Option<String>,
    created: Option<String>,
    updated: Option<String>,
    modified: Option<String>,
    metadata: Option<Metadata>,
    files: Option<Vec<FileEntry>>,
    stats: Option<Stats>,
    links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    title: Option<String>,
    description: Option<String>,
    doi: Option<String>,
    version: Option<String>,
    publication_date: Option<String>,
    creators: Option<Vec<Creator>>,
    keywords: Option<Vec<String>>,
    subjects: Option<Vec<Subject>>,
    license: Option<License>,
}

#[derive(Debug, Deserialize)]
struct Creator {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Subject {
    term: Option<String>,
    subject: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum License {
    Object { id: Option<String> },
    Plain(String),
}

impl License {
    fn into_id(self) -> Option<String> {
        match self {
            License::Object { id } => id,
            License::Plain(id) => Some(id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    size: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Stats {
    downloads: Option<Value>,
    unique_downloads: Option<Value>,
    views: Option<Value>,
    unique_views: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    self_html: Option<String>,
    html: Option<String>,
}
