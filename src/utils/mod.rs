//! Utility modules supporting dataset operations.
//!
//! - [`HttpClient`]: HTTP client with built-in rate limiting
//! - [`RateLimitedRequestBuilder`]: Builder for rate-limited HTTP requests
//! - [`RetryConfig`] / [`with_retry`]: bounded retry of transient failures
//! - [`deduplicate_records`]: Remove repeated `(source, id)` records
//! - [`find_cross_source_duplicates`]: Group records mirrored across repositories
//! - [`DatasetCache`]: Local JSON dataset store
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use dataset_master::sources::SourceError;
//! use dataset_master::utils::{with_retry, RetryConfig};
//!
//! # async fn fetch_data() -> Result<String, SourceError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), SourceError> {
//! let data = with_retry(RetryConfig::default(), || fetch_data()).await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod dedup;
mod http;
mod retry;

pub use cache::{CacheError, CacheStats, DatasetCache, SourceSnapshot, SourceStats, SyncReport};
pub use dedup::{deduplicate_records, find_cross_source_duplicates, DuplicateStrategy};
pub use http::{
    check_status, decode_json, default_user_agent, HttpClient, HttpSettings,
    RateLimitedRequestBuilder, DEFAULT_REQUESTS_PER_SECOND,
};
pub use retry::{api_retry_config, with_retry, RetryConfig, TransientError};
