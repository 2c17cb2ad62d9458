//! Core data models for datasets, fetch requests and filters.

mod dataset;
mod filter;
mod search;

pub use dataset::{DataFormat, DatasetBuilder, DatasetRecord, SourceType};
pub use filter::{sort_datasets, DatasetFilter};
pub use search::{FetchRequest, SearchQuery, SearchResponse, SortBy, SortOrder};
