//! DANDI Archive source implementation.
//!
//! Uses the DANDI REST API (page-number pagination, server-side search).
//! API documentation: <https://api.dandiarchive.org/swagger/>
//!
//! Listings (`/dandisets/`) carry no subject counts or modalities; those only
//! appear in a version's metadata, which [`DandiSource::get_by_id`] reads from
//! `/dandisets/{id}/versions/draft/info/`. Both payload shapes normalize here:
//!
//! | record field | listing | version info |
//! |---|---|---|
//! | `id` | `identifier` | `dandiset.identifier` |
//! | `name` | `draft_version.name` | `name` |
//! | `description` | | `metadata.description` |
//! | `modalities` | | `metadata.assetsSummary.{approach, measurementTechnique}[].name` |
//! | `n_subjects` | | `metadata.assetsSummary.numberOfSubjects` |
//! | `size_bytes` | `draft_version.size` | `size` |

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::config::Config;
use crate::models::{
    DataFormat, DatasetBuilder, DatasetRecord, FetchRequest, SearchQuery, SearchResponse,
    SourceType,
};
use crate::sources::normalize::{as_id, as_u64, infer_format, PageCollector};
use crate::sources::{Source, SourceCapabilities, SourceError};
use crate::utils::{api_retry_config, with_retry, HttpClient, RetryConfig};

const DANDI_API_BASE: &str = "https://api.dandiarchive.org/api";
const DANDI_WEB_URL: &str = "https://dandiarchive.org/dandiset";
const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_PAGE_SIZE: usize = 1000;

/// DANDI Archive source
///
/// Neurophysiology datasets in NWB format. Public listings need no API key.
#[derive(Debug, Clone)]
pub struct DandiSource {
    client: Arc<HttpClient>,
    base_url: String,
    retry: RetryConfig,
}

impl DandiSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(DANDI_API_BASE)
    }

    /// Create a source talking to another API root (mirrors, tests)
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
                .dandi
                .trim_end_matches('/')
                .to_string(),
            retry: config.retry_config(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn page_url(&self, page: usize, page_size: usize, search: Option<&str>) -> Result<Url, SourceError> {
        let mut params = vec![
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
            ("ordering", "-modified".to_string()),
            ("draft", "true".to_string()),
            ("empty", "false".to_string()),
        ];
        if let Some(search) = search {
            params.push(("search", search.to_string()));
        }
        Url::parse_with_params(&format!("{}/dandisets/", self.base_url), &params)
            .map_err(|e| SourceError::InvalidArgument(format!("bad DANDI URL: {}", e)))
    }

    async fn get_json<T>(&self, url: String) -> Result<T, SourceError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        with_retry(self.retry, || {
            let client = Arc::clone(&client);
            let url = url.clone();
            async move { client.get(&url).send_json().await }
        })
        .await
    }

    async fn list(
        &self,
        search: Option<&str>,
        request: &FetchRequest,
    ) -> Result<SearchResponse, SourceError> {
        let query = search.unwrap_or_default();
        if request.is_empty_request() {
            return Ok(SearchResponse::new(Vec::new(), self.id(), query));
        }

        let page_size = request.effective_page_size(DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
        let mut collector = PageCollector::new(SourceType::Dandi, request);
        let mut page = 1usize;
        let mut total = None;
        let mut has_more;

        loop {
            let url = self.page_url(page, page_size, search)?;
            let body: DandisetPage = self.get_json(url.to_string()).await?;
            total = body.count.or(total);

            let empty_page = body.results.is_empty();
            for raw in body.results {
                collector.push_raw(raw);
            }

            has_more = body.next.is_some() && !empty_page;
            tracing::debug!(
                "DANDI page {}: {} dandisets seen, more={}",
                page,
                collector.seen(),
                has_more
            );
            if collector.is_full() || !has_more {
                break;
            }
            page += 1;
        }

        let datasets = collector.into_records();
        tracing::info!("Fetched {} dandisets from DANDI", datasets.len());
        let mut response = SearchResponse::new(datasets, self.id(), query).has_more(has_more);
        response.total_results = total;
        Ok(response)
    }
}

#[async_trait]
impl Source for DandiSource {
    fn id(&self) -> &str {
        "dandi"
    }

    fn name(&self) -> &str {
        "DANDI Archive"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Dandi
    }

    fn description(&self) -> &str {
        "BRAIN Initiative archive for cellular neurophysiology data in NWB format"
    }

    fn homepage(&self) -> &str {
        "https://dandiarchive.org"
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
        let url = format!("{}/dandisets/{}/versions/draft/info/", self.base_url, id.trim());
        let raw: Value = self
            .get_json(url)
            .await
            .map_err(|e| e.or_not_found(|| format!("dandi:{}", id)))?;
        normalize(raw)
    }

    fn validate_id(&self, id: &str) -> Result<(), SourceError> {
        let id = id.trim();
        if id.len() != 6 || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(SourceError::InvalidArgument(format!(
                "invalid DANDI identifier '{}' (expected six digits, e.g. 000003)",
                id
            )));
        }
        Ok(())
    }
}

/// Map a dandiset listing entry or a version-info payload to a record
pub(crate) fn normalize(raw: Value) -> Result<DatasetRecord, SourceError> {
    let item: DandiRecord = serde_json::from_value(raw.clone())?;
    let dandiset = item.dandiset.unwrap_or_default();

    let id = item
        .identifier
        .as_ref()
        .or(dandiset.identifier.as_ref())
        .and_then(as_id)
        .ok_or_else(|| SourceError::MalformedResponse("DANDI record without identifier".to_string()))?;

    let draft = item.draft_version.unwrap_or_default();
    let published = item.most_recent_published_version.unwrap_or_default();
    let metadata = item.metadata.unwrap_or_default();
    let assets = metadata.assets_summary.unwrap_or_default();

    let name = item
        .name
        .or(draft.name)
        .or(published.name)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Dandiset {}", id));

    // Names carry a redundant "approach" / "technique" suffix
    let modalities = assets
        .approach
        .unwrap_or_default()
        .into_iter()
        .chain(assets.measurement_technique.unwrap_or_default())
        .filter_map(|a| a.name)
        .map(|n| {
            n.trim_end_matches(" approach")
                .trim_end_matches(" technique")
                .to_string()
        });

    let standards: Vec<String> = assets
        .data_standard
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| s.name)
        .collect();
    let format = match infer_format(standards.iter().map(String::as_str)) {
        DataFormat::Bids => DataFormat::Bids,
        _ => DataFormat::Nwb,
    };

    let mut authors: Vec<String> = metadata
        .contributor
        .unwrap_or_default()
        .into_iter()
        .filter(|c| c.include_in_citation.unwrap_or(true))
        .filter_map(|c| c.name)
        .collect();
    if authors.is_empty() {
        if let Some(contact) = item.contact_person.or(dandiset.contact_person) {
            authors.push(contact);
        }
    }

    let size = item
        .size
        .as_ref()
        .or(draft.size.as_ref())
        .or(assets.number_of_bytes.as_ref())
        .and_then(as_u64);

    let mut builder = DatasetBuilder::new(
        id.clone(),
        SourceType::Dandi,
        name,
        format,
        format!("{}/{}", DANDI_WEB_URL, id),
    )
    .modalities(modalities)
    .n_subjects(assets.number_of_subjects.as_ref().and_then(as_u64))
    .keywords(metadata.keywords.unwrap_or_default())
    .authors(authors)
    .doi(metadata.doi)
    .license(metadata.license.and_then(|l| l.into_iter().next()))
    .version(item.version.or(published.version).or(draft.version))
    .created(item.created.or(dandiset.created))
    .modified(item.modified.or(draft.modified).or(dandiset.modified))
    .size_bytes(size);

    if let Some(description) = metadata.description {
        builder = builder.description(description);
    }

    Ok(builder.raw(raw).build())
}

// ---- API response types ----

#[derive(Debug, Deserialize)]
struct DandisetPage {
    count: Option<usize>,
    next: Option<String>,
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct DandiRecord {
    identifier: Option<Value>,
    dandiset: Option<DandisetRef>,
    name: Option<String>,
    version: Option<String>,
    size: Option<Value>,
    created: Option<String>,
    modified: Option<String>,
    contact_person: Option<String>,
    draft_version: Option<VersionSummary>,
    most_recent_published_version: Option<VersionSummary>,
    metadata: Option<Metadata>,
}

#[derive(Debug, Default, Deserialize)]
struct DandisetRef {
    identifier: Option<Value>,
    created: Option<String>,
    modified: Option<String>,
    contact_person: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VersionSummary {
    version: Option<String>,
    name: Option<String>,
    size: Option<Value>,
    modified: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    description: Option<String>,
    license: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
    contributor: Option<Vec<Contributor>>,
    doi: Option<String>,
    assets_summary: Option<AssetsSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Contributor {
    name: Option<String>,
    include_in_citation: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetsSummary {
    number_of_subjects: Option<Value>,
    number_of_bytes: Option<Value>,
    approach: Option<Vec<Named>>,
    measurement_technique: Option<Vec<Named>>,
    data_standard: Option<Vec<Named>>,
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ErrorKind;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn listing_item(id: &str, name: &str) -> Value {
        json!({
            "identifier": id,
            "created": "2020-03-15T22:56:55.655000Z",
            "modified": "2024-01-10T12:00:00.000000Z",
            "contact_person": "Doe, Jane",
            "embargo_status": "OPEN",
            "draft_version": {
                "version": "draft",
                "name": name,
                "asset_count": 12,
                "size": 1073741824u64,
                "status": "Valid",
                "modified": "2024-01-10T12:00:00.000000Z"
            },
            "most_recent_published_version": { "version": "0.230629.1955", "name": name }
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

    #[test]
    fn test_normalize_listing_item() {
        let record = normalize(listing_item("000003", "Hippocampal place cells")).unwrap();

        assert_eq!(record.id, "000003");
        assert_eq!(record.source, SourceType::Dandi);
        assert_eq!(record.name, "Hippocampal place cells");
        assert_eq!(record.format, DataFormat::Nwb);
        assert_eq!(record.n_subjects, None);
        assert_eq!(record.version.as_deref(), Some("0.230629.1955"));
        assert_eq!(record.size_bytes, Some(1073741824));
        assert_eq!(record.authors, vec!["Doe, Jane"]);
        assert_eq!(record.url, "https://dandiarchive.org/dandiset/000003");
    }

    #[test]
    fn test_normalize_version_info() {
        let record = normalize(json!({
            "dandiset": { "identifier": "000026", "contact_person": "Lab" },
            "version": "draft",
            "name": "Human brain cell census",
            "size": 42,
            "metadata": {
                "description": "Multimodal imaging",
                "license": ["spdx:CC-BY-4.0"],
                "keywords": ["cortex"],
                "contributor": [
                    { "name": "Smith, A", "includeInCitation": true },
                    { "name": "Funder", "includeInCitation": false }
                ],
                "assetsSummary": {
                    "numberOfSubjects": 7,
                    "approach": [{ "name": "microscopy approach" }, { "name": "electrophysiological approach" }],
                    "measurementTechnique": [{ "name": "patch clamp technique" }],
                    "dataStandard": [{ "name": "Brain Imaging Data Structure (BIDS)" }]
                }
            }
        }))
        .unwrap();

        assert_eq!(record.id, "000026");
        assert_eq!(record.n_subjects, Some(7));
        assert!(record.has_modality("microscopy"));
        assert!(record.has_modality("electrophysiological"));
        assert!(record.has_modality("patch clamp"));
        assert_eq!(record.format, DataFormat::Bids);
        assert_eq!(record.authors, vec!["Smith, A"]);
        assert_eq!(record.license.as_deref(), Some("spdx:CC-BY-4.0"));
        assert_eq!(record.description.as_deref(), Some("Multimodal imaging"));
    }

    #[tokio::test]
    async fn test_fetch_follows_pages() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/dandisets/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("draft".into(), "true".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "count": 3,
                    "next": "https://api.dandiarchive.org/api/dandisets/?page=2",
                    "results": [listing_item("000001", "One"), listing_item("000002", "Two")]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/dandisets/")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "count": 3, "next": null, "results": [listing_item("000003", "Three")] })
                    .to_string(),
            )
            .create_async()
            .await;

        let source = DandiSource::with_base_url(server.url())
            .unwrap()
            .with_retry_config(fast_retry());
        let response = source.fetch(&FetchRequest::new().page_size(2)).await.unwrap();

        assert_eq!(response.datasets.len(), 3);
        assert_eq!(response.total_results, Some(3));
        assert!(!response.has_more);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_uses_server_side_query() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/dandisets/")
            .match_query(Matcher::UrlEncoded("search".into(), "place cells".into()))
            .with_status(200)
            .with_body(
                json!({ "count": 1, "next": null, "results": [listing_item("000003", "Place cells")] })
                    .to_string(),
            )
            .create_async()
            .await;

        let source = DandiSource::with_base_url(server.url())
            .unwrap()
            .with_retry_config(fast_retry());
        let response = source
            .search(&SearchQuery::new("place cells").limit(5))
            .await
            .unwrap();

        assert_eq!(response.datasets.len(), 1);
        assert_eq!(response.query, "place cells");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let mut server = mockito::Server::new_async().await;
        let _found = server
            .mock("GET", "/dandisets/000003/versions/draft/info/")
            .with_status(200)
            .with_body(
                json!({
                    "dandiset": { "identifier": "000003" },
                    "name": "Place cells",
                    "metadata": { "assetsSummary": { "numberOfSubjects": 12 } }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/dandisets/999999/versions/draft/info/")
            .with_status(404)
            .create_async()
            .await;

        let source = DandiSource::with_base_url(server.url())
            .unwrap()
            .with_retry_config(fast_retry());

        let record = source.get_by_id("000003").await.unwrap();
        assert_eq!(record.n_subjects, Some(12));
        assert!(matches!(
            source.get_by_id("999999").await,
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            source.get_by_id("3").await,
            Err(SourceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_listing_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/dandisets/")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let source = DandiSource::with_base_url(server.url())
            .unwrap()
            .with_retry_config(fast_retry());
        let err = source.fetch(&FetchRequest::new()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(matches!(err, SourceError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_error_on_later_page_fails_fetch() {
        let mut server = mockito::Server::new_async().await;
        let _first = server
            .mock("GET", "/dandisets/")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(
                json!({
                    "count": 4,
                    "next": "https://api.dandiarchive.org/api/dandisets/?page=2",
                    "results": [listing_item("000001", "One"), listing_item("000002", "Two")]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/dandisets/")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let source = DandiSource::with_base_url(server.url())
            .unwrap()
            .with_retry_config(fast_retry());
        let result = source.fetch(&FetchRequest::new().page_size(2)).await;

        match result {
            Err(err) => assert_eq!(err.kind(), ErrorKind::Unavailable),
            Ok(response) => panic!("expected failure, got {} records", response.datasets.len()),
        }
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_page() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/dandisets/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let source = DandiSource::with_base_url(server.url())
            .unwrap()
            .with_retry_config(fast_retry());
        assert!(matches!(
            source.fetch(&FetchRequest::new().max_results(1)).await,
            Err(SourceError::MalformedResponse(_))
        ));
    }
}
