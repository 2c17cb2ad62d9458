//! Tool handlers over the unified client and the local cache.
//!
//! Handlers never fail the RPC: errors come back as a payload shaped
//! `{"error": {"kind": ..., "message": ...}}` so agents can branch on `kind`.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::tools::ToolHandler;
use crate::models::{sort_datasets, DatasetFilter, DatasetRecord, SortBy, SortOrder, SourceType};
use crate::sources::{ErrorKind, SourceError};
use crate::unified::{DatasetClient, SourceFailure, UnifiedError};
use crate::utils::{CacheError, DatasetCache, SyncReport};

/// Default `max_datasets` for fetch tools
pub const DEFAULT_MAX_DATASETS: usize = 100;

/// Default `limit` for search and query tools
pub const DEFAULT_LIMIT: usize = 20;

/// Error returned by a tool, serialized into the error payload
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument,
            message: message.into(),
        }
    }

    /// The `{"error": {...}}` payload sent back to the client
    pub fn payload(&self) -> Value {
        json!({ "error": self })
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<SourceError> for ToolError {
    fn from(e: SourceError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<UnifiedError> for ToolError {
    fn from(e: UnifiedError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<CacheError> for ToolError {
    fn from(e: CacheError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

// ---- argument helpers ----

fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(other) => Err(ToolError::invalid(format!(
            "'{}' must be a string, got {}",
            key, other
        ))),
    }
}

fn optional_usize(args: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let n = value.as_u64().ok_or_else(|| {
                ToolError::invalid(format!("'{}' must be a non-negative integer, got {}", key, value))
            })?;
            usize::try_from(n)
                .map(Some)
                .map_err(|_| ToolError::invalid(format!("'{}' is too large: {}", key, n)))
        }
    }
}

/// `max_datasets`: default 100, 0 means no cap
fn max_datasets(args: &Value) -> Result<Option<usize>, ToolError> {
    Ok(match optional_usize(args, "max_datasets")? {
        None => Some(DEFAULT_MAX_DATASETS),
        Some(0) => None,
        Some(n) => Some(n),
    })
}

fn parse_filter(args: &Value) -> Result<DatasetFilter, ToolError> {
    match optional_str(args, "filter")? {
        Some(expr) => Ok(expr.parse()?),
        None => Ok(DatasetFilter::default()),
    }
}

/// `source`: absent or "all" selects every source
fn parse_source(args: &Value) -> Result<Option<SourceType>, ToolError> {
    match optional_str(args, "source")? {
        None => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => Ok(Some(s.parse()?)),
    }
}

fn parse_sort(args: &Value) -> Result<Option<(SortBy, SortOrder)>, ToolError> {
    let Some(by) = optional_str(args, "sort_by")? else {
        return Ok(None);
    };
    let order = match optional_str(args, "order")? {
        None => SortOrder::Descending,
        Some(o) if o.eq_ignore_ascii_case("asc") => SortOrder::Ascending,
        Some(o) if o.eq_ignore_ascii_case("desc") => SortOrder::Descending,
        Some(o) => return Err(ToolError::invalid(format!("unknown order '{}' (asc|desc)", o))),
    };
    Ok(Some((by.parse()?, order)))
}

fn datasets_payload(datasets: &[DatasetRecord], extra: Value) -> Value {
    let mut payload = json!({
        "count": datasets.len(),
        "datasets": datasets,
    });
    if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), extra) {
        target.extend(extra);
    }
    payload
}

// ---- handlers ----

/// Fetch datasets from one source
#[derive(Debug)]
pub struct FetchSourceHandler {
    pub client: Arc<DatasetClient>,
    pub source: SourceType,
}

#[async_trait::async_trait]
impl ToolHandler for FetchSourceHandler {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let max = max_datasets(&args)?;
        let filter = parse_filter(&args)?;

        let response = self
            .client
            .fetch_all_datasets(max, &[self.source], &filter)
            .await?;

        Ok(datasets_payload(
            &response.datasets,
            json!({ "source": self.source.id() }),
        ))
    }
}

/// Live search across one or all sources
#[derive(Debug)]
pub struct SearchHandler {
    pub client: Arc<DatasetClient>,
}

#[async_trait::async_trait]
impl ToolHandler for SearchHandler {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = optional_str(&args, "query")?
            .ok_or_else(|| ToolError::invalid("missing 'query' parameter"))?;
        let source = parse_source(&args)?;
        let limit = optional_usize(&args, "limit")?.unwrap_or(DEFAULT_LIMIT);

        let response = self.client.search(query, source, Some(limit)).await?;

        Ok(datasets_payload(
            &response.datasets,
            json!({
                "query": query,
                "counts": response.counts,
                "failures": response.failures,
            }),
        ))
    }
}

/// Filter and sort a caller-provided list of datasets
#[derive(Debug)]
pub struct FilterHandler;

#[async_trait::async_trait]
impl ToolHandler for FilterHandler {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let datasets = args
            .get("datasets")
            .cloned()
            .ok_or_else(|| ToolError::invalid("missing 'datasets' parameter"))?;
        let datasets: Vec<DatasetRecord> = serde_json::from_value(datasets)
            .map_err(|e| ToolError::invalid(format!("'datasets' is not a list of dataset records: {}", e)))?;

        let filter = parse_filter(&args)?;
        let mut datasets = filter.apply(datasets);
        if let Some((by, order)) = parse_sort(&args)? {
            sort_datasets(&mut datasets, by, order);
        }
        if let Some(limit) = optional_usize(&args, "limit")? {
            datasets.truncate(limit);
        }

        Ok(datasets_payload(&datasets, json!({})))
    }
}

/// Describe the registered sources
#[derive(Debug)]
pub struct ListSourcesHandler {
    pub client: Arc<DatasetClient>,
}

#[async_trait::async_trait]
impl ToolHandler for ListSourcesHandler {
    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        let sources = self.client.list_sources();
        Ok(json!({ "count": sources.len(), "sources": sources }))
    }
}

/// Sync the local cache from one or all sources
#[derive(Debug)]
pub struct DbSyncHandler {
    pub client: Arc<DatasetClient>,
    pub cache: Arc<DatasetCache>,
}

#[async_trait::async_trait]
impl ToolHandler for DbSyncHandler {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let requested: Vec<SourceType> = parse_source(&args)?.into_iter().collect();
        let max = optional_usize(&args, "max_datasets")?.filter(|n| *n > 0);
        let sources = self.client.registry().resolve(&requested)?;

        let mut reports: BTreeMap<String, SyncReport> = BTreeMap::new();
        let mut failures: Vec<SourceFailure> = Vec::new();
        for source in &sources {
            match self.cache.sync(source.as_ref(), max).await {
                Ok(report) => {
                    reports.insert(source.id().to_string(), report);
                }
                Err(e) => {
                    tracing::warn!("Sync of {} failed: {}", source.id(), e);
                    failures.push(SourceFailure {
                        source: source.source_type(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if !sources.is_empty() && reports.is_empty() {
            return Err(UnifiedError::AllSourcesFailed(failures).into());
        }
        Ok(json!({ "reports": reports, "failures": failures }))
    }
}

/// Query the local cache
#[derive(Debug)]
pub struct DbQueryHandler {
    pub cache: Arc<DatasetCache>,
}

#[async_trait::async_trait]
impl ToolHandler for DbQueryHandler {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let filter = parse_filter(&args)?;
        let limit = optional_usize(&args, "limit")?.unwrap_or(DEFAULT_LIMIT);

        let mut datasets = self.cache.query(&filter)?;
        let matched = datasets.len();
        if let Some((by, order)) = parse_sort(&args)? {
            sort_datasets(&mut datasets, by, order);
        }
        datasets.truncate(limit);

        Ok(datasets_payload(&datasets, json!({ "matched": matched })))
    }
}

/// Report cache statistics
#[derive(Debug)]
pub struct DbStatsHandler {
    pub cache: Arc<DatasetCache>,
}

#[async_trait::async_trait]
impl ToolHandler for DbStatsHandler {
    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        let stats = self.cache.stats()?;
        serde_json::to_value(stats).map_err(|e| ToolError {
            kind: ErrorKind::MalformedResponse,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_datasets_defaults() {
        assert_eq!(max_datasets(&json!({})).unwrap(), Some(DEFAULT_MAX_DATASETS));
        assert_eq!(max_datasets(&json!({ "max_datasets": 0 })).unwrap(), None);
        assert_eq!(max_datasets(&json!({ "max_datasets": 7 })).unwrap(), Some(7));
        assert!(max_datasets(&json!({ "max_datasets": -1 })).is_err());
        assert!(max_datasets(&json!({ "max_datasets": "ten" })).is_err());
    }

    #[test]
    fn test_optional_usize_range() {
        assert_eq!(optional_usize(&json!({ "limit": 5 }), "limit").unwrap(), Some(5));

        let huge = json!({ "limit": u64::MAX });
        match usize::try_from(u64::MAX) {
            Ok(max) => assert_eq!(optional_usize(&huge, "limit").unwrap(), Some(max)),
            Err(_) => assert_eq!(
                optional_usize(&huge, "limit").unwrap_err().kind,
                ErrorKind::InvalidArgument
            ),
        }
    }

    #[test]
    fn test_parse_source() {
        assert_eq!(parse_source(&json!({})).unwrap(), None);
        assert_eq!(parse_source(&json!({ "source": "ALL" })).unwrap(), None);
        assert_eq!(
            parse_source(&json!({ "source": "dandi" })).unwrap(),
            Some(SourceType::Dandi)
        );
        let err = parse_source(&json!({ "source": "arxiv" })).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_parse_sort() {
        assert!(parse_sort(&json!({})).unwrap().is_none());
        assert_eq!(
            parse_sort(&json!({ "sort_by": "subjects", "order": "asc" })).unwrap(),
            Some((SortBy::Subjects, SortOrder::Ascending))
        );
        assert!(parse_sort(&json!({ "sort_by": "subjects", "order": "up" })).is_err());
    }

    #[test]
    fn test_error_payload_shape() {
        let payload = ToolError::invalid("bad").payload();
        assert_eq!(payload["error"]["kind"], "invalid_argument");
        assert_eq!(payload["error"]["message"], "bad");
    }
}
