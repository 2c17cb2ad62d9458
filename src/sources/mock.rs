//! Mock source for testing purposes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::models::{
    DataFormat, DatasetBuilder, DatasetRecord, FetchRequest, SearchResponse, SourceType,
};
use crate::sources::{ErrorKind, Source, SourceCapabilities, SourceError};

/// A mock source that serves predefined datasets or a forced failure.
///
/// It reports the id of the [`SourceType`] it stands in for, so it can
/// replace a real adapter in a [`SourceRegistry`](super::SourceRegistry).
#[derive(Debug)]
pub struct MockSource {
    source_type: SourceType,
    datasets: Mutex<Vec<DatasetRecord>>,
    failure: Mutex<Option<(ErrorKind, String)>>,
    calls: AtomicUsize,
}

impl MockSource {
    /// Create a new mock source with no datasets.
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            datasets: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Serve these datasets from `fetch`.
    pub fn with_datasets(self, datasets: Vec<DatasetRecord>) -> Self {
        self.set_datasets(datasets);
        self
    }

    /// Serve `count` generated datasets named `<prefix>0001`, `<prefix>0002`, ...
    pub fn with_generated(self, prefix: &str, count: usize) -> Self {
        let source_type = self.source_type;
        self.with_datasets(
            (1..=count)
                .map(|i| make_dataset(&format!("{}{:04}", prefix, i), source_type))
                .collect(),
        )
    }

    /// Fail every call with an error of this kind.
    pub fn failing(self, kind: ErrorKind, message: impl Into<String>) -> Self {
        if let Ok(mut guard) = self.failure.lock() {
            *guard = Some((kind, message.into()));
        }
        self
    }

    /// Replace the served datasets.
    pub fn set_datasets(&self, datasets: Vec<DatasetRecord>) {
        if let Ok(mut guard) = self.datasets.lock() {
            *guard = datasets;
        }
    }

    /// Clear the forced failure.
    pub fn clear_failure(&self) {
        if let Ok(mut guard) = self.failure.lock() {
            *guard = None;
        }
    }

    /// Number of `fetch`/`get_by_id` calls that reached this source.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let guard = self
            .failure
            .lock()
            .map_err(|_| SourceError::Unavailable("mock state poisoned".to_string()))?;
        match guard.as_ref() {
            None => Ok(()),
            Some((kind, message)) => Err(error_for(*kind, message)),
        }
    }

    fn snapshot(&self) -> Result<Vec<DatasetRecord>, SourceError> {
        self.datasets
            .lock()
            .map(|d| d.clone())
            .map_err(|_| SourceError::Unavailable("mock state poisoned".to_string()))
    }
}

fn error_for(kind: ErrorKind, message: &str) -> SourceError {
    let message = message.to_string();
    match kind {
        ErrorKind::Unavailable => SourceError::Unavailable(message),
        ErrorKind::MalformedResponse => SourceError::MalformedResponse(message),
        ErrorKind::NotFound => SourceError::NotFound(message),
        ErrorKind::InvalidArgument => SourceError::InvalidArgument(message),
        ErrorKind::RateLimit => SourceError::RateLimit,
        ErrorKind::NotImplemented => SourceError::NotImplemented,
        ErrorKind::Io => SourceError::Io(std::io::Error::other(message)),
    }
}

#[async_trait]
impl Source for MockSource {
    fn id(&self) -> &str {
        self.source_type.id()
    }

    fn name(&self) -> &str {
        self.source_type.name()
    }

    fn source_type(&self) -> SourceType {
        self.source_type
    }

    fn description(&self) -> &str {
        "In-memory mock repository"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FETCH | SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<SearchResponse, SourceError> {
        if request.is_empty_request() {
            return Ok(SearchResponse::new(Vec::new(), self.id(), ""));
        }
        self.check_failure()?;

        let mut datasets = request.filter.apply(self.snapshot()?);
        let total = datasets.len();
        if let Some(max) = request.max_results {
            datasets.truncate(max);
        }
        let has_more = datasets.len() < total;

        Ok(SearchResponse::new(datasets, self.id(), "")
            .total_results(total)
            .has_more(has_more))
    }

    async fn get_by_id(&self, id: &str) -> Result<DatasetRecord, SourceError> {
        self.validate_id(id)?;
        self.check_failure()?;
        self.snapshot()?
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| SourceError::NotFound(format!("{}:{}", self.id(), id)))
    }
}

/// Helper function to create a mock dataset for testing.
pub fn make_dataset(id: &str, source_type: SourceType) -> DatasetRecord {
    let format = match source_type {
        SourceType::OpenNeuro => DataFormat::Bids,
        SourceType::Dandi => DataFormat::Nwb,
        _ => DataFormat::Other,
    };
    DatasetBuilder::new(
        id,
        source_type,
        format!("Mock dataset {}", id),
        format,
        format!("http://example.com/{}/{}", source_type.id(), id),
    )
    .build()
}
