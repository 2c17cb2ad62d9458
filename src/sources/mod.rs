//! Dataset repository adapters with a trait-based architecture.
//!
//! This module defines the [`Source`] trait that every repository adapter
//! implements. Adapters translate one repository's HTTP API into
//! [`DatasetRecord`]s and are collected in a [`SourceRegistry`].
//!
//! # Feature Flags
//!
//! Individual sources can be disabled at compile time using Cargo features:
//!
//! - `openneuro` - Enable OpenNeuro (default: enabled)
//! - `dandi` - Enable DANDI Archive (default: enabled)
//! - `physionet` - Enable PhysioNet (default: enabled)
//! - `zenodo` - Enable Zenodo (default: enabled)
//!
//! # Runtime Source Configuration
//!
//! - `DATASET_MASTER_ENABLED_SOURCES` - Only use these sources (e.g., "openneuro,dandi")
//! - `DATASET_MASTER_DISABLED_SOURCES` - Never use these sources (e.g., "zenodo")
//!
//! `DISABLED_SOURCES` always takes precedence.

#[cfg(feature = "source-dandi")]
mod dandi;
pub mod mock;
pub mod normalize;
#[cfg(feature = "source-openneuro")]
mod openneuro;
#[cfg(feature = "source-physionet")]
mod physionet;
mod registry;
#[cfg(feature = "source-zenodo")]
mod zenodo;

#[cfg(feature = "source-dandi")]
pub use dandi::DandiSource;
pub use mock::MockSource;
#[cfg(feature = "source-openneuro")]
pub use openneuro::OpenNeuroSource;
#[cfg(feature = "source-physionet")]
pub use physionet::PhysioNetSource;
pub use registry::{SourceCapabilities, SourceInfo, SourceRegistry};
#[cfg(feature = "source-zenodo")]
pub use zenodo::ZenodoSource;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::{DatasetFilter, DatasetRecord, FetchRequest, SearchQuery, SearchResponse, SourceType};

/// The Source trait defines the interface for all repository adapters.
///
/// # Implementing a New Source
///
/// 1. Create a struct that implements `Source`
/// 2. Implement `id`, `name`, `source_type` and `fetch`
/// 3. Override `search` when the upstream API offers server-side search
/// 4. Register it with the [`SourceRegistry`]
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Unique identifier for this source (used in tool names, e.g., "openneuro")
    fn id(&self) -> &str;

    /// Human-readable name of this source
    fn name(&self) -> &str;

    /// Repository this adapter talks to
    fn source_type(&self) -> SourceType;

    /// One-line description of the repository
    fn description(&self) -> &str {
        ""
    }

    /// Repository landing page
    fn homepage(&self) -> &str {
        ""
    }

    /// Describe the capabilities of this source
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FETCH | SourceCapabilities::SEARCH
    }

    /// Whether this source supports free-text search
    fn supports_search(&self) -> bool {
        self.capabilities().contains(SourceCapabilities::SEARCH)
    }

    /// List datasets, paginating until `max_results` matching records are
    /// collected or the source is exhausted
    async fn fetch(&self, _request: &FetchRequest) -> Result<SearchResponse, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// Free-text search over title and description
    ///
    /// The default implementation pages through the listing with the phrase
    /// as a client-side filter, stopping once `limit` matches are collected.
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SourceError> {
        query.validate()?;
        if query.limit == Some(0) {
            return Ok(SearchResponse::new(Vec::new(), self.id(), &query.query));
        }

        let mut request = FetchRequest::new().filter(DatasetFilter::new().phrase(&query.query));
        request.max_results = query.limit;
        request.scan_limit = query.scan_limit;
        let listing = self.fetch(&request).await?;

        Ok(SearchResponse::new(listing.datasets, self.id(), &query.query).has_more(listing.has_more))
    }

    /// Get a dataset by its source-scoped id
    async fn get_by_id(&self, _id: &str) -> Result<DatasetRecord, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// Validate that a dataset id is correctly formatted for this source
    fn validate_id(&self, id: &str) -> Result<(), SourceError> {
        if id.trim().is_empty() {
            return Err(SourceError::InvalidArgument(
                "dataset id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Coarse error category, stable across releases and serialized in tool payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unavailable,
    MalformedResponse,
    NotFound,
    InvalidArgument,
    RateLimit,
    NotImplemented,
    Io,
}

/// Errors that can occur when interacting with a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The requested operation is not implemented for this source
    #[error("Operation not implemented for this source")]
    NotImplemented,

    /// Network failure or timeout
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Non-success HTTP status
    #[error("Source unavailable: HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Payload could not be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Dataset or endpoint not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request parameters
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Read an HTTP 404 from a single-dataset endpoint as an unknown id
    pub fn or_not_found(self, key: impl FnOnce() -> String) -> Self {
        match self {
            SourceError::Status { status: 404, .. } => SourceError::NotFound(key()),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::NotImplemented => ErrorKind::NotImplemented,
            SourceError::Unavailable(_) | SourceError::Status { .. } => ErrorKind::Unavailable,
            SourceError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            SourceError::NotFound(_) => ErrorKind::NotFound,
            SourceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SourceError::RateLimit => ErrorKind::RateLimit,
            SourceError::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::MalformedResponse(err.to_string())
        } else if err.is_timeout() {
            SourceError::Unavailable(format!("request timed out: {}", err))
        } else if let Some(status) = err.status() {
            SourceError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SourceError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::MalformedResponse(format!("JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataFormat, DatasetBuilder};

    #[test]
    fn test_source_capabilities() {
        let caps = SourceCapabilities::FETCH | SourceCapabilities::LOOKUP;

        assert!(caps.contains(SourceCapabilities::FETCH));
        assert!(caps.contains(SourceCapabilities::LOOKUP));
        assert!(!caps.contains(SourceCapabilities::SERVER_SEARCH));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SourceError::Status {
                status: 500,
                message: String::new()
            }
            .kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(
            SourceError::MalformedResponse(String::new()).kind(),
            ErrorKind::MalformedResponse
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::InvalidArgument).unwrap(),
            "invalid_argument"
        );
    }

    #[test]
    fn test_or_not_found_only_maps_404() {
        let missing = SourceError::Status {
            status: 404,
            message: String::new(),
        }
        .or_not_found(|| "dandi:000001".to_string());
        assert!(matches!(missing, SourceError::NotFound(ref key) if key == "dandi:000001"));

        let down = SourceError::Status {
            status: 503,
            message: String::new(),
        }
        .or_not_found(|| "dandi:000001".to_string());
        assert_eq!(down.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_default_search_filters_listing() {
        let source = MockSource::new(SourceType::PhysioNet).with_datasets(vec![
            DatasetBuilder::new("sleep-edf", SourceType::PhysioNet, "Sleep-EDF Database", DataFormat::Other, "u")
                .build(),
            DatasetBuilder::new("mitdb", SourceType::PhysioNet, "MIT-BIH Arrhythmia", DataFormat::Other, "u")
                .description("ECG recordings, some during sleep studies")
                .build(),
            DatasetBuilder::new("eegmmidb", SourceType::PhysioNet, "EEG Motor Movement", DataFormat::Other, "u")
                .build(),
        ]);

        let response = source.search(&SearchQuery::new("SLEEP")).await.unwrap();
        let ids: Vec<_> = response.datasets.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["sleep-edf", "mitdb"]);

        let limited = source
            .search(&SearchQuery::new("sleep").limit(1))
            .await
            .unwrap();
        assert_eq!(limited.datasets.len(), 1);
        assert!(limited.has_more);

        assert!(matches!(
            source.search(&SearchQuery::new("")).await,
            Err(SourceError::InvalidArgument(_))
        ));
    }
}
