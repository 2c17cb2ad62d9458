//! # Dataset Master
//!
//! Fetch, search and cache dataset metadata from neuroscience repositories
//! (OpenNeuro, DANDI Archive, PhysioNet, Zenodo), normalized into one
//! [`DatasetRecord`] shape. Served as a CLI and as an MCP tool server.
//!
//! ## Architecture
//!
//! - [`models`]: Dataset records, fetch requests and the filter language
//! - [`sources`]: Repository adapters behind the [`Source`] trait
//! - [`unified`]: The [`DatasetClient`] facade merging results across sources
//! - [`utils`]: HTTP client, retry, deduplication and the local [`DatasetCache`]
//! - [`mcp`]: MCP protocol tools and server
//! - [`config`]: Configuration management
//! - [`ui`]: Terminal tables and status output

pub mod config;
pub mod mcp;
pub mod models;
pub mod sources;
pub mod ui;
pub mod unified;
pub mod utils;

// Re-export commonly used types
pub use models::DatasetRecord;
pub use sources::{Source, SourceRegistry};
pub use unified::DatasetClient;
pub use utils::DatasetCache;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
