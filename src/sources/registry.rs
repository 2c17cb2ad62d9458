//! Registry for managing repository adapters.

use serde::Serialize;
use std::sync::Arc;

use super::{Source, SourceError};
use crate::config::Config;
use crate::models::SourceType;

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        const FETCH = 1 << 0;
        const SEARCH = 1 << 1;
        const SERVER_SEARCH = 1 << 2;
        const LOOKUP = 1 << 3;
    }
}

impl SourceCapabilities {
    /// Capability names for display and tool payloads
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::FETCH) {
            names.push("fetch");
        }
        if self.contains(Self::SEARCH) {
            names.push("search");
        }
        if self.contains(Self::SERVER_SEARCH) {
            names.push("server_search");
        }
        if self.contains(Self::LOOKUP) {
            names.push("lookup");
        }
        names
    }
}

/// Serializable description of a registered source
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub capabilities: Vec<&'static str>,
}

impl SourceInfo {
    fn from_source(source: &dyn Source) -> Self {
        Self {
            id: source.id().to_string(),
            name: source.name().to_string(),
            description: source.description().to_string(),
            homepage: source.homepage().to_string(),
            capabilities: source.capabilities().names(),
        }
    }
}

/// Registry of available repository adapters
///
/// Sources are kept in declared priority order (see [`SourceType::ALL`]),
/// which is the order multi-source results are merged in.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceRegistry {
    /// Create a registry with every compiled-in source and default settings
    pub fn new() -> Result<Self, SourceError> {
        Self::from_config(&Config::default())
    }

    /// Create an empty registry
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry from configuration
    ///
    /// Sources excluded by `sources.enabled_sources` / `sources.disabled_sources`
    /// are not registered.
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let mut registry = Self::empty();

        #[cfg(feature = "source-openneuro")]
        if config.sources.is_enabled(SourceType::OpenNeuro.id()) {
            registry.register(Arc::new(super::OpenNeuroSource::from_config(config)?));
        }

        #[cfg(feature = "source-dandi")]
        if config.sources.is_enabled(SourceType::Dandi.id()) {
            registry.register(Arc::new(super::DandiSource::from_config(config)?));
        }

        #[cfg(feature = "source-physionet")]
        if config.sources.is_enabled(SourceType::PhysioNet.id()) {
            registry.register(Arc::new(super::PhysioNetSource::from_config(config)?));
        }

        #[cfg(feature = "source-zenodo")]
        if config.sources.is_enabled(SourceType::Zenodo.id()) {
            registry.register(Arc::new(super::ZenodoSource::from_config(config)?));
        }

        if registry.is_empty() {
            tracing::warn!("No sources enabled; check enabled_sources/disabled_sources");
        }

        Ok(registry)
    }

    /// Register a source, replacing any source with the same id
    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.retain(|s| s.id() != source.id());
        self.sources.push(source);
        self.sources
            .sort_by_key(|s| s.source_type().priority());
    }

    /// Get a source by ID
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Source>> {
        self.sources.iter().find(|s| s.id() == id)
    }

    /// Get a source by ID, returning an error if not found
    pub fn get_required(&self, id: &str) -> Result<&Arc<dyn Source>, SourceError> {
        self.get(id).ok_or_else(|| {
            SourceError::InvalidArgument(format!(
                "source '{}' is unknown or disabled (available: {})",
                id,
                self.ids().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Resolve requested sources in priority order; an empty request means all
    pub fn resolve(&self, requested: &[SourceType]) -> Result<Vec<Arc<dyn Source>>, SourceError> {
        if requested.is_empty() {
            return Ok(self.sources.clone());
        }

        let mut requested = requested.to_vec();
        requested.sort();
        requested.dedup();
        requested
            .iter()
            .map(|source| self.get_required(source.id()).cloned())
            .collect()
    }

    /// Get all registered sources in priority order
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.iter()
    }

    /// Get all source IDs
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.id())
    }

    /// Get sources that support a specific capability
    pub fn with_capability(&self, capability: SourceCapabilities) -> Vec<&Arc<dyn Source>> {
        self.all()
            .filter(|s| s.capabilities().contains(capability))
            .collect()
    }

    /// Get sources that support search
    pub fn searchable(&self) -> Vec<&Arc<dyn Source>> {
        self.with_capability(SourceCapabilities::SEARCH)
    }

    /// Describe every registered source
    pub fn info(&self) -> Vec<SourceInfo> {
        self.all().map(|s| SourceInfo::from_source(s.as_ref())).collect()
    }

    /// Check if a source exists
    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Get the number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
