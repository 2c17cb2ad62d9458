//! Tool registry for MCP tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::sources::SourceCapabilities;
use crate::unified::DatasetClient;
use crate::utils::DatasetCache;

pub use super::unified_tools::{
    DbQueryHandler, DbStatsHandler, DbSyncHandler, FetchSourceHandler, FilterHandler,
    ListSourcesHandler, SearchHandler, ToolError, DEFAULT_LIMIT, DEFAULT_MAX_DATASETS,
};

const FILTER_HELP: &str = "Filter expression, whitespace-separated terms: \
    free text, source:openneuro,dandi, modality:eeg, task:rest, format:bids|nwb|other, \
    subjects>=20, subjects<100, downloads>500, has:description";

/// An MCP tool that can be called by the client
#[derive(Clone)]
pub struct Tool {
    /// Tool name (e.g., "dataset_search")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    pub input_schema: Value,

    /// Handler function to execute the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Handler for executing a tool
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + std::fmt::Debug {
    /// Execute the tool with the given arguments
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Registry for all MCP tools, ordered by name
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    /// Register one fetch tool per fetch-capable source plus the shared tools
    pub fn new(client: Arc<DatasetClient>, cache: Arc<DatasetCache>) -> Self {
        let mut registry = Self::default();
        registry.register_fetch_tools(&client);
        registry.register_search_tools(&client);
        registry.register_db_tools(&client, &cache);
        registry
    }

    fn register_fetch_tools(&mut self, client: &Arc<DatasetClient>) {
        for source in client.registry().with_capability(SourceCapabilities::FETCH) {
            let source_type = source.source_type();
            self.register(Tool {
                name: format!("dataset_{}_fetch", source.id()),
                description: format!(
                    "Fetch dataset metadata from {}. {}",
                    source.name(),
                    source.description()
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "max_datasets": {
                            "type": "integer",
                            "description": "Maximum number of datasets to return (0 = all)",
                            "default": DEFAULT_MAX_DATASETS,
                            "minimum": 0
                        },
                        "filter": {
                            "type": "string",
                            "description": FILTER_HELP
                        }
                    }
                }),
                handler: Arc::new(FetchSourceHandler {
                    client: Arc::clone(client),
                    source: source_type,
                }),
            });
        }
    }

    fn register_search_tools(&mut self, client: &Arc<DatasetClient>) {
        let source_ids: Vec<&str> = client.registry().ids().collect();

        self.register(Tool {
            name: "dataset_search".to_string(),
            description: format!(
                "Search dataset titles and descriptions across {} repositories",
                source_ids.len()
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Free text matched case-insensitively against title and description"
                    },
                    "source": {
                        "type": "string",
                        "description": format!(
                            "Restrict to one source ({}) or 'all'",
                            source_ids.join(", ")
                        )
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of datasets in total",
                        "default": DEFAULT_LIMIT,
                        "minimum": 0
                    }
                },
                "required": ["query"]
            }),
            handler: Arc::new(SearchHandler {
                client: Arc::clone(client),
            }),
        });

        self.register(Tool {
            name: "dataset_filter".to_string(),
            description: "Filter and sort a list of dataset records returned by another tool"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "datasets": {
                        "type": "array",
                        "items": { "type": "object" },
                        "description": "Dataset records as returned by the fetch and search tools"
                    },
                    "filter": { "type": "string", "description": FILTER_HELP },
                    "sort_by": {
                        "type": "string",
                        "enum": ["downloads", "views", "subjects", "size", "name", "created", "modified"]
                    },
                    "order": { "type": "string", "enum": ["asc", "desc"], "default": "desc" },
                    "limit": { "type": "integer", "minimum": 0 }
                },
                "required": ["datasets"]
            }),
            handler: Arc::new(FilterHandler),
        });

        self.register(Tool {
            name: "dataset_list_sources".to_string(),
            description: "List the dataset repositories available on this server".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
            handler: Arc::new(ListSourcesHandler {
                client: Arc::clone(client),
            }),
        });
    }

    fn register_db_tools(&mut self, client: &Arc<DatasetClient>, cache: &Arc<DatasetCache>) {
        self.register(Tool {
            name: "dataset_db_sync".to_string(),
            description: "Refresh the local dataset cache from one or all sources".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "source": {
                        "type": "string",
                        "description": "Source to sync, or 'all' (default)"
                    },
                    "max_datasets": {
                        "type": "integer",
                        "description": "Maximum datasets per source (0 = all)",
                        "default": 0,
                        "minimum": 0
                    }
                }
            }),
            handler: Arc::new(DbSyncHandler {
                client: Arc::clone(client),
                cache: Arc::clone(cache),
            }),
        });

        self.register(Tool {
            name: "dataset_db_query".to_string(),
            description: "Query the local dataset cache without network access".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filter": { "type": "string", "description": FILTER_HELP },
                    "sort_by": {
                        "type": "string",
                        "enum": ["downloads", "views", "subjects", "size", "name", "created", "modified"]
                    },
                    "order": { "type": "string", "enum": ["asc", "desc"], "default": "desc" },
                    "limit": {
                        "type": "integer",
                        "default": DEFAULT_LIMIT,
                        "minimum": 0
                    }
                }
            }),
            handler: Arc::new(DbQueryHandler {
                cache: Arc::clone(cache),
            }),
        });

        self.register(Tool {
            name: "dataset_db_stats".to_string(),
            description: "Record counts and last sync time per source in the local cache"
                .to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
            handler: Arc::new(DbStatsHandler {
                cache: Arc::clone(cache),
            }),
        });
    }

    /// Register a tool
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Get all tools
    pub fn all(&self) -> Vec<&Tool> {
        self.tools.values().collect()
    }

    /// Tool names in order
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name, folding errors into the error payload
    pub async fn execute(&self, name: &str, args: Value) -> Value {
        let Some(tool) = self.get(name) else {
            return ToolError::invalid(format!("tool '{}' not found", name)).payload();
        };

        match tool.handler.execute(args).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Tool {} failed: {}", name, e);
                e.payload()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use crate::sources::{MockSource, SourceRegistry};
    use crate::unified::FetchContext;
    use tempfile::tempdir;

    fn registry(dir: &std::path::Path) -> ToolRegistry {
        let mut sources = SourceRegistry::empty();
        sources.register(Arc::new(
            MockSource::new(SourceType::OpenNeuro).with_generated("ds", 12),
        ));
        sources.register(Arc::new(MockSource::new(SourceType::Dandi).with_generated("00", 3)));
        let client = Arc::new(DatasetClient::new(Arc::new(sources), FetchContext::default()));
        ToolRegistry::new(client, Arc::new(DatasetCache::new(dir)))
    }

    #[test]
    fn test_tool_names() {
        let dir = tempdir().unwrap();
        let tools = registry(dir.path());

        assert_eq!(
            tools.names(),
            vec![
                "dataset_dandi_fetch",
                "dataset_db_query",
                "dataset_db_stats",
                "dataset_db_sync",
                "dataset_filter",
                "dataset_list_sources",
                "dataset_openneuro_fetch",
                "dataset_search",
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_tool_defaults_and_zero_means_all() {
        let dir = tempdir().unwrap();
        let tools = registry(dir.path());

        let capped = tools
            .execute("dataset_openneuro_fetch", json!({ "max_datasets": 5 }))
            .await;
        assert_eq!(capped["count"], 5);
        assert_eq!(capped["source"], "openneuro");

        let all = tools
            .execute("dataset_openneuro_fetch", json!({ "max_datasets": 0 }))
            .await;
        assert_eq!(all["count"], 12);
    }

    #[tokio::test]
    async fn test_errors_are_payloads() {
        let dir = tempdir().unwrap();
        let tools = registry(dir.path());

        let missing = tools.execute("dataset_search", json!({})).await;
        assert_eq!(missing["error"]["kind"], "invalid_argument");

        let bad_filter = tools
            .execute("dataset_dandi_fetch", json!({ "filter": "colour:blue" }))
            .await;
        assert_eq!(bad_filter["error"]["kind"], "invalid_argument");

        let unknown = tools.execute("download_dataset", json!({})).await;
        assert!(unknown["error"]["message"].as_str().unwrap().contains("not found"));

        let not_initialized = tools.execute("dataset_db_query", json!({})).await;
        assert_eq!(not_initialized["error"]["kind"], "io");
    }

    #[tokio::test]
    async fn test_filter_tool_sorts_and_limits() {
        let dir = tempdir().unwrap();
        let tools = registry(dir.path());

        let fetched = tools
            .execute("dataset_openneuro_fetch", json!({ "max_datasets": 0 }))
            .await;
        let filtered = tools
            .execute(
                "dataset_filter",
                json!({
                    "datasets": fetched["datasets"],
                    "filter": "ds001",
                    "sort_by": "name",
                    "order": "asc",
                    "limit": 2
                }),
            )
            .await;

        assert_eq!(filtered["count"], 2);
        assert_eq!(filtered["datasets"][0]["id"], "ds0010");
    }

    #[tokio::test]
    async fn test_db_tools_round_trip() {
        let dir = tempdir().unwrap();
        let tools = registry(dir.path());

        let sync = tools.execute("dataset_db_sync", json!({ "source": "dandi" })).await;
        assert_eq!(sync["reports"]["dandi"]["total"], 3);

        let query = tools
            .execute("dataset_db_query", json!({ "filter": "source:dandi", "limit": 2 }))
            .await;
        assert_eq!(query["count"], 2);
        assert_eq!(query["matched"], 3);

        let stats = tools.execute("dataset_db_stats", json!({})).await;
        assert_eq!(stats["total_records"], 3);
    }
}
