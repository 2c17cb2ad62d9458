//! Unified fetch/search facade over every registered source.
//!
//! [`DatasetClient`] fans a request out to the selected adapters with a
//! bounded number of requests in flight, then merges the answers in declared
//! source priority order (never arrival order), drops repeated
//! `(source, id)` pairs and applies the overall cap.
//!
//! One failing source does not fail the call: its error is logged and
//! reported in [`AggregateResponse::failures`]. Only when every selected
//! source fails is the whole call an error.

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{DatasetFilter, DatasetRecord, FetchRequest, SearchQuery, SearchResponse, SourceType};
use crate::sources::{ErrorKind, Source, SourceError, SourceInfo, SourceRegistry};
use crate::utils::{deduplicate_records, DuplicateStrategy};

/// One boxed per-source call
type SourceCall = BoxFuture<'static, Result<SearchResponse, SourceError>>;

/// Per-call execution settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchContext {
    /// Sources queried at the same time
    pub max_concurrent_requests: usize,
}

impl FetchContext {
    pub fn new(max_concurrent_requests: usize) -> Self {
        Self {
            max_concurrent_requests: max_concurrent_requests.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.rate_limits.max_concurrent_requests)
    }
}

impl Default for FetchContext {
    fn default() -> Self {
        Self::new(4)
    }
}

/// A source that failed during a multi-source call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: SourceType,
    pub kind: ErrorKind,
    pub message: String,
}

impl SourceFailure {
    fn new(source: SourceType, error: &SourceError) -> Self {
        Self {
            source,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source.id(), self.message)
    }
}

/// Merged result of a multi-source call
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateResponse {
    /// Records in source priority order, unique by `(source, id)`
    pub datasets: Vec<DatasetRecord>,
    /// Sources that failed while others succeeded
    pub failures: Vec<SourceFailure>,
    /// Number of returned records per source id
    pub counts: BTreeMap<String, usize>,
}

impl AggregateResponse {
    /// Whether some selected source failed
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Errors from the unified facade
#[derive(Debug, thiserror::Error)]
pub enum UnifiedError {
    /// Rejected before any network call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Every selected source failed
    #[error("All sources failed: {}", join_failures(.0))]
    AllSourcesFailed(Vec<SourceFailure>),

    /// Single-source operation failed
    #[error(transparent)]
    Source(#[from] SourceError),
}

fn join_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl UnifiedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnifiedError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            UnifiedError::AllSourcesFailed(failures) => failures
                .first()
                .map_or(ErrorKind::Unavailable, |f| f.kind),
            UnifiedError::Source(e) => e.kind(),
        }
    }
}

/// Client that fetches and searches across the registered sources
#[derive(Debug, Clone)]
pub struct DatasetClient {
    registry: Arc<SourceRegistry>,
    context: FetchContext,
}

impl DatasetClient {
    pub fn new(registry: Arc<SourceRegistry>, context: FetchContext) -> Self {
        Self { registry, context }
    }

    /// Build the registry and context from configuration
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        Ok(Self::new(
            Arc::new(SourceRegistry::from_config(config)?),
            FetchContext::from_config(config),
        ))
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn context(&self) -> FetchContext {
        self.context
    }

    /// Describe the registered sources
    pub fn list_sources(&self) -> Vec<SourceInfo> {
        self.registry.info()
    }

    fn select(&self, requested: &[SourceType]) -> Result<Vec<Arc<dyn Source>>, UnifiedError> {
        self.registry
            .resolve(requested)
            .map_err(|e| UnifiedError::InvalidArgument(e.to_string()))
    }

    /// List datasets from the requested sources (all when `sources` is empty)
    ///
    /// `max_datasets` caps the merged result; `None` fetches everything.
    /// `Some(0)` returns an empty response without touching the network.
    pub async fn fetch_all_datasets(
        &self,
        max_datasets: Option<usize>,
        sources: &[SourceType],
        filter: &DatasetFilter,
    ) -> Result<AggregateResponse, UnifiedError> {
        let requested = if sources.is_empty() {
            filter.sources.as_slice()
        } else {
            sources
        };
        let selected = self.select(requested)?;
        if max_datasets == Some(0) {
            return Ok(AggregateResponse::default());
        }

        let request = FetchRequest {
            max_results: max_datasets,
            page_size: None,
            filter: filter.clone(),
            scan_limit: None,
        };
        tracing::info!(
            "Fetching datasets from {} source(s) (max={:?})",
            selected.len(),
            max_datasets
        );

        let results = self
            .fan_out(selected, move |source| {
                let request = request.clone();
                Box::pin(async move { source.fetch(&request).await }) as SourceCall
            })
            .await;
        merge(results, max_datasets)
    }

    /// Free-text search over one source, or all searchable sources
    ///
    /// `limit` caps the merged result, not each source.
    pub async fn search(
        &self,
        query: &str,
        source: Option<SourceType>,
        limit: Option<usize>,
    ) -> Result<AggregateResponse, UnifiedError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(UnifiedError::InvalidArgument(
                "search query must not be empty".to_string(),
            ));
        }

        let selected: Vec<Arc<dyn Source>> = match source {
            Some(source) => {
                let selected = self.select(&[source])?;
                if let Some(s) = selected.iter().find(|s| !s.supports_search()) {
                    return Err(UnifiedError::InvalidArgument(format!(
                        "source '{}' does not support search",
                        s.id()
                    )));
                }
                selected
            }
            None => self.registry.searchable().into_iter().cloned().collect(),
        };
        if limit == Some(0) {
            return Ok(AggregateResponse::default());
        }

        let mut search_query = SearchQuery::new(query);
        search_query.limit = limit;
        tracing::info!("Searching {} source(s) for '{}'", selected.len(), query);

        let results = self
            .fan_out(selected, move |source| {
                let search_query = search_query.clone();
                Box::pin(async move { source.search(&search_query).await }) as SourceCall
            })
            .await;
        merge(results, limit)
    }

    /// Look up one dataset by its source-scoped id
    pub async fn get_dataset(&self, source: SourceType, id: &str) -> Result<DatasetRecord, UnifiedError> {
        let adapter = self
            .registry
            .get_required(source.id())
            .map_err(|e| UnifiedError::InvalidArgument(e.to_string()))?;
        adapter.validate_id(id).map_err(|e| UnifiedError::InvalidArgument(e.to_string()))?;
        Ok(adapter.get_by_id(id.trim()).await?)
    }

    /// Run `call` against each source, at most `max_concurrent_requests` at
    /// a time, yielding results in the order of `sources`
    async fn fan_out<F>(
        &self,
        sources: Vec<Arc<dyn Source>>,
        call: F,
    ) -> Vec<(SourceType, Result<SearchResponse, SourceError>)>
    where
        F: Fn(Arc<dyn Source>) -> SourceCall,
    {
        let calls: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let source_type = source.source_type();
                let fut = call(source);
                async move { (source_type, fut.await) }
            })
            .collect();
        stream::iter(calls)
            .buffered(self.context.max_concurrent_requests)
            .collect()
            .await
    }
}

/// Merge per-source results in the order given, reporting failures
fn merge(
    results: Vec<(SourceType, Result<SearchResponse, SourceError>)>,
    cap: Option<usize>,
) -> Result<AggregateResponse, UnifiedError> {
    let attempted = results.len();
    let mut datasets = Vec::new();
    let mut failures = Vec::new();

    for (source, result) in results {
        match result {
            Ok(response) => {
                tracing::debug!("{} returned {} records", source.id(), response.datasets.len());
                datasets.extend(response.datasets);
            }
            Err(e) => {
                tracing::warn!("Source {} failed: {}", source.id(), e);
                failures.push(SourceFailure::new(source, &e));
            }
        }
    }

    if attempted > 0 && failures.len() == attempted {
        return Err(UnifiedError::AllSourcesFailed(failures));
    }

    let mut datasets = deduplicate_records(datasets, DuplicateStrategy::First);
    if let Some(cap) = cap {
        datasets.truncate(cap);
    }

    let mut counts = BTreeMap::new();
    for record in &datasets {
        *counts.entry(record.source.id().to_string()).or_insert(0) += 1;
    }

    Ok(AggregateResponse {
        datasets,
        failures,
        counts,
    })
}
