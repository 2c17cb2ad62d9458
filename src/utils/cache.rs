//! Local dataset cache.
//!
//! A file-based JSON store that mirrors the last successful sync of each
//! source, so dataset listings can be filtered offline.
//!
//! # Cache Structure
//!
//! ```text
//! ~/.cache/dataset-master/
//!   datasets/
//!     openneuro.json
//!     dandi.json
//!     physionet.json
//!     zenodo.json
//! ```
//!
//! Each file holds one [`SourceSnapshot`]: the sync time plus the records in
//! the order they were fetched. Files are replaced atomically (temp file and
//! rename), so a reader never sees a half-written snapshot. `sync` is the
//! only writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::models::{DatasetFilter, DatasetRecord, FetchRequest, SourceType};
use crate::sources::{ErrorKind, Source, SourceError};

/// Directory under the cache root holding the per-source snapshots
const STORE_DIR: &str = "datasets";

/// Errors raised by the local cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Dataset cache not initialized at {} (run `dataset-master db init`)", .0.display())]
    NotInitialized(PathBuf),

    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Invalid cache query: {0}")]
    InvalidQuery(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::NotInitialized(_) | CacheError::Io(_) => ErrorKind::Io,
            CacheError::Serialization(_) => ErrorKind::MalformedResponse,
            CacheError::Source(e) => e.kind(),
            CacheError::InvalidQuery(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Records of one source as of its last sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub source: SourceType,
    pub synced_at: DateTime<Utc>,
    pub records: Vec<DatasetRecord>,
}

/// Outcome of a sync or upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records not previously cached
    pub inserted: usize,
    /// Records that replaced a cached record with the same id
    pub updated: usize,
    /// Cached records absent from the latest fetch
    pub removed: usize,
    /// Records cached for the source after the sync
    pub total: usize,
}

/// Per-source cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: SourceType,
    pub records: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub directory: PathBuf,
    pub initialized: bool,
    pub sources: Vec<SourceStats>,
    pub total_records: usize,
    pub size_bytes: u64,
}

/// File-based dataset cache
#[derive(Debug, Clone)]
pub struct DatasetCache {
    store_dir: PathBuf,
}

impl DatasetCache {
    /// Create a cache rooted at `root`; nothing is touched on disk yet
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: root.into().join(STORE_DIR),
        }
    }

    /// Create a cache at the configured (or default) cache directory
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache_dir())
    }

    /// Directory holding the snapshot files
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Create the empty store; a no-op when it already exists
    pub fn init(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.store_dir)?;
        tracing::info!("Dataset cache initialized at {}", self.store_dir.display());
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store_dir.is_dir()
    }

    fn ensure_initialized(&self) -> Result<(), CacheError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CacheError::NotInitialized(self.store_dir.clone()))
        }
    }

    fn snapshot_path(&self, source: SourceType) -> PathBuf {
        self.store_dir.join(format!("{}.json", source.id()))
    }

    /// Load the snapshot of `source`, if it has ever been synced
    pub fn snapshot(&self, source: SourceType) -> Result<Option<SourceSnapshot>, CacheError> {
        let path = self.snapshot_path(source);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_snapshot(&self, snapshot: &SourceSnapshot) -> Result<(), CacheError> {
        let mut file = NamedTempFile::new_in(&self.store_dir)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
        }
        file.persist(self.snapshot_path(snapshot.source))
            .map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    }

    /// Replace the cached records of `source` with `records`
    ///
    /// Records are keyed by id; a repeated id keeps its last value at the
    /// position of its first appearance. Records from another source are
    /// ignored.
    pub fn upsert(
        &self,
        source: SourceType,
        records: Vec<DatasetRecord>,
    ) -> Result<SyncReport, CacheError> {
        self.ensure_initialized()?;

        let previous: HashMap<String, DatasetRecord> = self
            .snapshot(source)?
            .map(|s| s.records.into_iter().map(|r| (r.id.clone(), r)).collect())
            .unwrap_or_default();

        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut fresh: Vec<DatasetRecord> = Vec::with_capacity(records.len());
        for record in records {
            if record.source != source {
                tracing::warn!(
                    "Ignoring {} record {} offered to the {} cache",
                    record.source.id(),
                    record.id,
                    source.id()
                );
                continue;
            }
            match positions.get(&record.id) {
                Some(&idx) => fresh[idx] = record,
                None => {
                    positions.insert(record.id.clone(), fresh.len());
                    fresh.push(record);
                }
            }
        }

        let updated = fresh.iter().filter(|r| previous.contains_key(&r.id)).count();
        let report = SyncReport {
            inserted: fresh.len() - updated,
            updated,
            removed: previous.len() - updated,
            total: fresh.len(),
        };

        self.write_snapshot(&SourceSnapshot {
            source,
            synced_at: Utc::now(),
            records: fresh,
        })?;

        tracing::info!(
            "Cached {} {} records ({} new, {} updated, {} removed)",
            report.total,
            source.id(),
            report.inserted,
            report.updated,
            report.removed
        );
        Ok(report)
    }

    /// Fetch up to `max` records from `source` and mirror them locally
    ///
    /// Creates the store if needed. On a fetch failure the previous snapshot
    /// is left untouched.
    pub async fn sync(
        &self,
        source: &dyn Source,
        max: Option<usize>,
    ) -> Result<SyncReport, CacheError> {
        self.init()?;

        let mut request = FetchRequest::new();
        request.max_results = max;
        let response = source.fetch(&request).await?;

        self.upsert(source.source_type(), response.datasets)
    }

    /// Cached records matching `filter`, in source priority order
    pub fn query(&self, filter: &DatasetFilter) -> Result<Vec<DatasetRecord>, CacheError> {
        self.ensure_initialized()?;

        let mut matches = Vec::new();
        for source in SourceType::ALL {
            if !filter.sources.is_empty() && !filter.sources.contains(&source) {
                continue;
            }
            if let Some(snapshot) = self.snapshot(source)? {
                matches.extend(snapshot.records.into_iter().filter(|r| filter.matches(r)));
            }
        }
        Ok(matches)
    }

    /// Parse a filter expression and query with it
    pub fn query_expr(&self, expr: &str) -> Result<Vec<DatasetRecord>, CacheError> {
        let filter: DatasetFilter = expr
            .parse()
            .map_err(|e: SourceError| CacheError::InvalidQuery(e.to_string()))?;
        self.query(&filter)
    }

    /// Record counts, last sync times and size on disk
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        if !self.is_initialized() {
            return Ok(CacheStats {
                directory: self.store_dir.clone(),
                initialized: false,
                sources: Vec::new(),
                total_records: 0,
                size_bytes: 0,
            });
        }

        let mut sources = Vec::new();
        let mut size_bytes = 0;
        for source in SourceType::ALL {
            let path = self.snapshot_path(source);
            if let Ok(meta) = fs::metadata(&path) {
                size_bytes += meta.len();
            }
            let snapshot = self.snapshot(source)?;
            sources.push(SourceStats {
                source,
                records: snapshot.as_ref().map_or(0, |s| s.records.len()),
                last_sync: snapshot.map(|s| s.synced_at),
            });
        }

        Ok(CacheStats {
            directory: self.store_dir.clone(),
            initialized: true,
            total_records: sources.iter().map(|s| s.records).sum(),
            sources,
            size_bytes,
        })
    }

    /// Delete the store and everything in it
    pub fn clear(&self) -> Result<(), CacheError> {
        if self.is_initialized() {
            fs::remove_dir_all(&self.store_dir)?;
            tracing::info!("Dataset cache cleared at {}", self.store_dir.display());
        }
        Ok(())
    }
}
