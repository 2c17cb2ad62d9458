//! Fetch/search request and response models.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::dataset::DatasetRecord;
use super::filter::DatasetFilter;
use crate::sources::SourceError;

/// Sort order for dataset listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// Sort field for dataset listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Downloads,
    Views,
    Subjects,
    Size,
    Name,
    Created,
    Modified,
}

impl FromStr for SortBy {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "downloads" => Ok(SortBy::Downloads),
            "views" => Ok(SortBy::Views),
            "subjects" | "n_subjects" => Ok(SortBy::Subjects),
            "size" | "size_gb" | "size_bytes" => Ok(SortBy::Size),
            "name" | "title" => Ok(SortBy::Name),
            "created" => Ok(SortBy::Created),
            "modified" | "updated" => Ok(SortBy::Modified),
            _ => Err(SourceError::InvalidArgument(format!(
                "unknown sort field '{}' (expected downloads, views, subjects, size, name, created or modified)",
                s
            ))),
        }
    }
}

/// Listing request for one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Maximum number of matching records to return (None = everything)
    pub max_results: Option<usize>,

    /// Upstream page size; adapters clamp it to what the API accepts
    pub page_size: Option<usize>,

    /// Client-side filter applied while paginating
    #[serde(default)]
    pub filter: DatasetFilter,

    /// Stop after this many distinct upstream records, matching or not
    #[serde(default)]
    pub scan_limit: Option<usize>,
}

impl FetchRequest {
    /// Create a request for everything the source lists
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum results
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Set page size
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Set filter
    pub fn filter(mut self, filter: DatasetFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set scan limit
    pub fn scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = Some(limit);
        self
    }

    /// True when the caller asked for zero records
    pub fn is_empty_request(&self) -> bool {
        self.max_results == Some(0)
    }

    /// Whether `collected` records satisfy the cap
    pub fn is_satisfied(&self, collected: usize) -> bool {
        self.max_results.is_some_and(|max| collected >= max)
    }

    /// Effective page size given the source default and upper bound
    pub fn effective_page_size(&self, default: usize, upper: usize) -> usize {
        let wanted = self.page_size.unwrap_or(default);
        let wanted = match self.max_results {
            // Without a filter there is no point asking for more than the cap
            Some(max) if self.filter.is_empty() => wanted.min(max),
            _ => wanted,
        };
        wanted.clamp(1, upper)
    }
}

/// Free-text search query for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free text, matched case-insensitively against title and description
    pub query: String,

    /// Maximum number of results to return (None = everything)
    pub limit: Option<usize>,

    /// Upper bound on records a client-side search may scan
    pub scan_limit: Option<usize>,
}

impl SearchQuery {
    /// Create a new search query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
            scan_limit: None,
        }
    }

    /// Set maximum results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set scan limit
    pub fn scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = Some(limit);
        self
    }

    /// Validate the query before any network call
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.query.trim().is_empty() {
            return Err(SourceError::InvalidArgument(
                "search query must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Response from one source containing datasets and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Datasets found
    pub datasets: Vec<DatasetRecord>,

    /// Total number of results reported upstream (may be more than returned)
    pub total_results: Option<usize>,

    /// Source of the results
    pub source: String,

    /// Query that was executed (empty for plain listings)
    pub query: String,

    /// Whether more results are available
    pub has_more: bool,
}

impl SearchResponse {
    /// Create a new search response
    pub fn new(
        datasets: Vec<DatasetRecord>,
        source: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            datasets,
            total_results: None,
            source: source.into(),
            query: query.into(),
            has_more: false,
        }
    }

    /// Set total results
    pub fn total_results(mut self, total: usize) -> Self {
        self.total_results = Some(total);
        self
    }

    /// Set has_more flag
    pub fn has_more(mut self, has_more: bool) -> Self {
        self.has_more = has_more;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_page_size() {
        let request = FetchRequest::new().max_results(10);
        assert_eq!(request.effective_page_size(100, 100), 10);

        let request = FetchRequest::new().page_size(500);
        assert_eq!(request.effective_page_size(100, 100), 100);

        let request = FetchRequest::new()
            .max_results(10)
            .filter("modality:eeg".parse().unwrap());
        assert_eq!(request.effective_page_size(100, 100), 100);
    }

    #[test]
    fn test_fetch_request_caps() {
        let request = FetchRequest::new().max_results(0);
        assert!(request.is_empty_request());
        assert!(request.is_satisfied(0));

        let unbounded = FetchRequest::new();
        assert!(!unbounded.is_satisfied(10_000));
    }

    #[test]
    fn test_search_query_validation() {
        assert!(SearchQuery::new("  ").validate().is_err());
        assert!(SearchQuery::new("sleep").limit(5).validate().is_ok());
    }

    #[test]
    fn test_sort_by_parse() {
        assert_eq!("n_subjects".parse::<SortBy>().unwrap(), SortBy::Subjects);
        assert_eq!("Downloads".parse::<SortBy>().unwrap(), SortBy::Downloads);
        assert!("relevance".parse::<SortBy>().is_err());
    }
}
