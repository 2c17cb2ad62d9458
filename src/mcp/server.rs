//! MCP server implementation using pmcp (Pragmatic AI's rust-mcp-sdk).
//!
//! Serves the dataset tools over stdio or streamable HTTP.

use crate::mcp::tools::{ToolHandler as DatasetToolHandler, ToolRegistry};
use crate::unified::DatasetClient;
use crate::utils::DatasetCache;
use async_trait::async_trait;
use pmcp::{
    server::streamable_http_server::StreamableHttpServer, Error, RequestHandlerExtra, Server,
    ServerCapabilities, ToolHandler, ToolInfo,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// The MCP server for dataset discovery
#[derive(Debug, Clone)]
pub struct McpServer {
    server: Arc<Mutex<Server>>,
    tool_names: Vec<String>,
}

impl McpServer {
    /// Create a server exposing the tools for `client` and `cache`
    pub fn new(client: Arc<DatasetClient>, cache: Arc<DatasetCache>) -> Result<Self, pmcp::Error> {
        let tools = ToolRegistry::new(client, cache);
        let tool_names = tools.names().into_iter().map(str::to_string).collect();
        let server = Self::build_server(tools)?;
        Ok(Self {
            server: Arc::new(Mutex::new(server)),
            tool_names,
        })
    }

    /// Names of the registered tools
    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    fn build_server(tools: ToolRegistry) -> Result<Server, pmcp::Error> {
        let mut builder = Server::builder()
            .name("dataset-master")
            .version(env!("CARGO_PKG_VERSION"))
            .capabilities(ServerCapabilities::default());

        for tool in tools.all() {
            let wrapper = ToolWrapper {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                input_schema: tool.input_schema.clone(),
                handler: Arc::clone(&tool.handler),
            };
            builder = builder.tool(wrapper.name.clone(), wrapper);
        }

        builder.build()
    }

    /// Run the server in stdio mode
    pub async fn run(self) -> Result<(), pmcp::Error> {
        tracing::info!(
            "Starting MCP server in stdio mode with {} tools",
            self.tool_names.len()
        );

        // run_stdio() takes ownership of the Server
        let server = Arc::try_unwrap(self.server)
            .map_err(|_| Error::internal("MCP server is still shared"))?
            .into_inner();

        server.run_stdio().await
    }

    /// Run the server in streamable HTTP mode
    pub async fn run_http(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>), pmcp::Error> {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::invalid_params(format!("Invalid address '{}': {}", addr, e)))?;
        tracing::info!("Starting MCP server in HTTP mode on {}", socket_addr);

        StreamableHttpServer::new(socket_addr, Arc::clone(&self.server))
            .start()
            .await
    }
}

/// Adapts a dataset tool to pmcp's ToolHandler; tool errors become an
/// error-shaped result rather than an RPC error
#[derive(Clone)]
struct ToolWrapper {
    name: String,
    description: Option<String>,
    input_schema: Value,
    handler: Arc<dyn DatasetToolHandler>,
}

#[async_trait]
impl ToolHandler for ToolWrapper {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> Result<Value, Error> {
        match self.handler.execute(args).await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::debug!("Tool {} failed: {}", self.name, e);
                Ok(e.payload())
            }
        }
    }

    fn metadata(&self) -> Option<ToolInfo> {
        Some(ToolInfo::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        ))
    }
}
