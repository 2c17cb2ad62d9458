//! PhysioNet source implementation.
//!
//! Uses the PhysioNet REST database list, which has been served both as a
//! bare JSON array and as a paginated `{results, next}` envelope. Both are
//! accepted.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{DataFormat, DatasetBuilder, DatasetRecord, FetchRequest, SearchResponse, SourceType};
use crate::sources::normalize::{as_u64, infer_modalities, lenient, strip_html, PageCollector};
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::{api_retry_config, with_retry, HttpClient, RetryConfig};

const PHYSIONET_BASE_URL: &str = "https://physionet.org";
const PHYSIONET_CONTENT_URL: &str = "https://physionet.org/content";

/// Upper bound on list pages followed in one fetch
const MAX_PAGES: usize = 200;

/// PhysioNet source
///
/// Physiological signal databases (ECG, EEG, ICU records), mostly in WFDB
/// format. The list endpoint has no search, so `search` and `get_by_id`
/// scan the listing.
#[derive(Debug, Clone)]
pub struct PhysioNetSource {
    client: Arc<HttpClient>,
    base_url: String,
    retry: RetryConfig,
}

impl PhysioNetSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(PHYSIONET_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        Ok(Self {
            client: Arc::new(HttpClient::new()?),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: api_retry_config(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            client: Arc::new(HttpClient::with_settings(&config.http_settings())?),
            base_url: config
                .sources
                .endpoints
                .physionet
                .trim_end_matches('/')
                .to_string(),
            retry: config.retry_config(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get_page(&self, page: usize) -> Result<DatabaseList, SourceError> {
        let url = format!("{}/rest/database-list/?page={}", self.base_url, page);
        let client = Arc::clone(&self.client);
        with_retry(self.retry, || {
            let client = Arc::clone(&client);
            let url = url.clone();
            async move { client.get(&url).send_json().await }
        })
        .await
    }
}

#[async_trait]
impl Source for PhysioNetSource {
    fn id(&self) -> &str {
        "physionet"
    }

    fn name(&self) -> &str {
        "PhysioNet"
    }

    fn source_type(&self) -> SourceType {
        SourceType::PhysioNet
    }

    fn description(&self) -> &str {
        "Research resource for complex physiologic signals (ECG, EEG, ICU databases)"
    }

    fn homepage(&self) -> &str {
        "https://physionet.org"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FETCH | SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<SearchResponse, SourceError> {
        if request.is_empty_request() {
            return Ok(SearchResponse::new(Vec::new(), self.id(), ""));
        }

        let mut collector = PageCollector::new(SourceType::PhysioNet, request);
        let mut page = 1usize;
        let mut has_more;

        loop {
            let (items, next) = match self.get_page(page).await? {
                DatabaseList::Bare(items) => (items, None),
                DatabaseList::Paged(body) => (
                    body.results.or(body.databases).unwrap_or_default(),
                    body.next,
                ),
            };

            let empty_page = items.is_empty();
            for raw in items {
                collector.push_raw(raw);
            }

            has_more = next.is_some() && !empty_page;
            if collector.is_full() || !has_more {
                break;
            }
            if page >= MAX_PAGES {
                tracing::warn!("PhysioNet listing exceeded {} pages; stopping", MAX_PAGES);
                break;
            }
            page += 1;
        }

        let datasets = collector.into_records();
        tracing::info!("Fetched {} databases from PhysioNet", datasets.len());
        Ok(SearchResponse::new(datasets, self.id(), "").has_more(has_more))
    }

    async fn get_by_id(&self, id: &str) -> Result<DatasetRecord, SourceError> {
        self.validate_id(id)?;
        let wanted = id.trim().to_lowercase();

        self.fetch(&FetchRequest::new())
            .await?
            .datasets
            .into_iter()
            .find(|d| d.id.to_lowercase() == wanted)
            .ok_or_else(|| SourceError::NotFound(format!("physionet:{}", id)))
    }
}

/// Map one database-list entry to a record
pub(crate) fn normalize(raw: Value) -> Result<DatasetRecord, SourceError> {
    let item: Database = serde_json::from_value(raw.clone())?;
    let slug = item
        .slug
        .or(item.short_name)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SourceError::MalformedResponse("PhysioNet database without slug".to_string()))?;

    let name = item
        .title
        .or(item.name)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| slug.clone());

    let url = match &item.version {
        Some(version) => format!("{}/{}/{}/", PHYSIONET_CONTENT_URL, slug, version),
        None => format!("{}/{}/", PHYSIONET_CONTENT_URL, slug),
    };

    let description = item
        .r#abstract
        .or(item.description)
        .or(item.short_description)
        .map(|d| strip_html(&d));

    let modalities = infer_modalities([name.as_str()]);

    let mut builder = DatasetBuilder::new(slug, SourceType::PhysioNet, name, DataFormat::Other, url)
        .modalities(modalities)
        .n_subjects(item.subject_count.as_ref().and_then(as_u64))
        .doi(item.doi.or(item.core_doi))
        .license(item.license.and_then(License::into_name))
        .version(item.version)
        .created(item.publish_date.or(item.publish_datetime))
        .size_bytes(
            item.total_size
                .as_ref()
                .or(item.main_storage_size.as_ref())
                .and_then(as_u64),
        );

    if let Some(description) = description {
        builder = builder.description(description);
    }

    Ok(builder.raw(raw).build())
}

// ---- API response types ----

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DatabaseList {
    Bare(Vec<Value>),
    Paged(PagedList),
}

#[derive(Debug, Deserialize)]
struct PagedList {
    results: Option<Vec<Value>>,
    databases: Option<Vec<Value>>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Database {
    #[serde(default, deserialize_with = "lenient")]
    slug: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    short_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    version: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    r#abstract: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    short_description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    doi: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    core_doi: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    license: Option<License>,
    subject_count: Option<Value>,
    total_size: Option<Value>,
    main_storage_size: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    publish_date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    publish_datetime: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum License {
    Named { name: Option<String> },
    Plain(String),
}

impl License {
    fn into_name(self) -> Option<String> {
        match self {
            License::Named { name } => name,
            License::Plain(name) => Some(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatasetFilter, SearchQuery};
    use serde_json::json;
    use std::time::Duration;

    fn database(slug: &str, title: &str, subjects: u64) -> Value {
        json!({
            "slug": slug,
            "title": title,
            "version": "1.0.0",
            "abstract": "<p>Recordings of <b>sleep</b> patients.</p>",
            "doi": format!("10.13026/{}", slug),
            "license": { "name": "Open Data Commons Attribution License v1.0" },
            "subject_count": subjects,
            "total_size": "1048576",
            "publish_date": "2019-05-01"
        })
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        }
    }

    async fn source_for(server: &mockito::Server) -> PhysioNetSource {
        PhysioNetSource::with_base_url(server.url())
            .unwrap()
            .with_retry_config(fast_retry())
    }

    #[test]
    fn test_normalize_database() {
        let record = normalize(database("sleep-edfx", "Sleep-EDF Database Expanded (EEG)", 197)).unwrap();

        assert_eq!(record.id, "sleep-edfx");
        assert_eq!(record.source, SourceType::PhysioNet);
        assert_eq!(record.n_subjects, Some(197));
        assert!(record.has_modality("EEG"));
        assert_eq!(record.format, DataFormat::Other);
        assert_eq!(record.description.as_deref(), Some("Recordings of sleep patients."));
        assert_eq!(record.size_bytes, Some(1048576));
        assert_eq!(
            record.license.as_deref(),
            Some("Open Data Commons Attribution License v1.0")
        );
        assert_eq!(record.url, "https://physionet.org/content/sleep-edfx/1.0.0/");
    }

    #[test]
    fn test_normalize_alternate_field_names() {
        let record = normalize(json!({
            "short_name": "mitdb",
            "name": "MIT-BIH Arrhythmia Database",
            "license": "ODC-By",
            "description": "ECG recordings"
        }))
        .unwrap();

        assert_eq!(record.id, "mitdb");
        assert_eq!(record.name, "MIT-BIH Arrhythmia Database");
        assert_eq!(record.license.as_deref(), Some("ODC-By"));
        assert_eq!(record.n_subjects, None);
        assert_eq!(record.url, "https://physionet.org/content/mitdb/");
    }

    #[test]
    fn test_normalize_tolerates_odd_optional_fields() {
        let record = normalize(json!({
            "slug": "ltdb",
            "title": ["Long-Term ECG"],
            "name": "Long-Term ECG Database",
            "version": 1,
            "license": 42,
            "subject_count": "seven"
        }))
        .unwrap();

        assert_eq!(record.id, "ltdb");
        assert_eq!(record.name, "Long-Term ECG Database");
        assert_eq!(record.url, "https://physionet.org/content/ltdb/");
        assert_eq!(record.license, None);
        assert_eq!(record.n_subjects, None);
    }

    #[tokio::test]
    async fn test_fetch_bare_array() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/rest/database-list/")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(
                json!([
                    database("a", "Alpha ECG", 10),
                    { "title": "no slug" },
                    database("b", "Beta EEG", 40)
                ])
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let source = source_for(&server).await;
        let request = FetchRequest::new().filter(DatasetFilter::new().min_subjects(20));
        let response = source.fetch(&request).await.unwrap();

        assert_eq!(response.datasets.len(), 1);
        assert_eq!(response.datasets[0].id, "b");
        assert!(!response.has_more);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_paged_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _p1 = server
            .mock("GET", "/rest/database-list/")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(
                json!({ "results": [database("a", "A", 1)], "next": "?page=2" }).to_string(),
            )
            .create_async()
            .await;
        let _p2 = server
            .mock("GET", "/rest/database-list/")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(
                json!({ "databases": [database("b", "B", 2)], "next": null }).to_string(),
            )
            .create_async()
            .await;

        let source = source_for(&server).await;
        let response = source.fetch(&FetchRequest::new()).await.unwrap();
        let ids: Vec<_> = response.datasets.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_search_stops_paging_at_limit() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/rest/database-list/")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(
                json!({
                    "results": [database("mitdb", "Arrhythmia", 47), database("chbmit", "Scalp EEG", 22)],
                    "next": "?page=2"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/rest/database-list/")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(json!({ "results": [database("eegmmidb", "Motor EEG", 109)], "next": null }).to_string())
            .expect(0)
            .create_async()
            .await;

        let source = source_for(&server).await;
        let found = source.search(&SearchQuery::new("eeg").limit(1)).await.unwrap();

        assert_eq!(found.datasets.len(), 1);
        assert_eq!(found.datasets[0].id, "chbmit");
        assert!(found.has_more);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_and_lookup_scan_listing() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/rest/database-list/")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                json!([database("chbmit", "CHB-MIT Scalp EEG", 22), database("mitdb", "Arrhythmia", 47)])
                    .to_string(),
            )
            .create_async()
            .await;

        let source = source_for(&server).await;

        let found = source.search(&SearchQuery::new("scalp eeg")).await.unwrap();
        assert_eq!(found.datasets.len(), 1);
        assert_eq!(found.datasets[0].id, "chbmit");

        let record = source.get_by_id("MITDB").await.unwrap();
        assert_eq!(record.n_subjects, Some(47));
        assert!(matches!(
            source.get_by_id("missing").await,
            Err(SourceError::NotFound(_))
        ));
    }
}
