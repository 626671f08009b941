//! MCP Server Implementation
//!
//! Connection handling, message routing and the connection state machine for
//! an MCP server speaking newline-delimited JSON-RPC.

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use crate::mcp::validation::{McpValidator, compile_schema, schema_violations};
use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// MCP Server state and configuration
pub struct McpServer {
    /// Server implementation information
    pub server_info: Implementation,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Usage hints returned from `initialize`
    pub instructions: Option<String>,
    /// Registered tools
    pub tools: Arc<RwLock<HashMap<String, Tool>>>,
    /// Compiled `inputSchema` of every registered tool
    tool_schemas: Arc<RwLock<HashMap<String, JSONSchema>>>,
    /// Registered resources
    pub resources: Arc<RwLock<HashMap<String, Resource>>>,
    /// Tool handlers
    pub tool_handlers: Arc<RwLock<HashMap<String, Box<dyn ToolHandler>>>>,
    /// Resource handlers
    pub resource_handlers: Arc<RwLock<HashMap<String, Box<dyn ResourceHandler>>>>,
    /// Connection state
    pub connection_state: Arc<RwLock<ConnectionState>>,
    /// Protocol version agreed during `initialize`
    negotiated_version: Arc<RwLock<Option<String>>>,
    /// Message validator
    pub validator: Arc<McpValidator>,
    started_at: Instant,
}

fn parse_error_response() -> JsonRpcMessage {
    JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(JsonRpcError::parse_error(), None))
}

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Tool handler trait for implementing tool execution
///
/// Arguments have already been validated against the tool's input schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

/// Resource handler trait for implementing resource access
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn handle(&self, uri: &str) -> Result<Vec<ResourceContents>>;
}

/// Message handler for processing incoming messages
pub struct MessageHandler {
    server: Arc<McpServer>,
}

impl McpServer {
    /// Create a new MCP server
    #[inline]
    pub fn new(name: String, version: String) -> Result<Self> {
        let server_info = Implementation { name, version };

        let capabilities = ServerCapabilities {
            experimental: None,
            resources: Some(ResourcesCapability {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
        };

        let validator = McpValidator::new()?;

        Ok(Self {
            server_info,
            capabilities,
            instructions: None,
            tools: Arc::new(RwLock::new(HashMap::new())),
            tool_schemas: Arc::new(RwLock::new(HashMap::new())),
            resources: Arc::new(RwLock::new(HashMap::new())),
            tool_handlers: Arc::new(RwLock::new(HashMap::new())),
            resource_handlers: Arc::new(RwLock::new(HashMap::new())),
            connection_state: Arc::new(RwLock::new(ConnectionState::Uninitialized)),
            negotiated_version: Arc::new(RwLock::new(None)),
            validator: Arc::new(validator),
            started_at: Instant::now(),
        })
    }

    #[inline]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Register a tool with the server.
    ///
    /// Fails if the tool's input schema does not compile.
    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H) -> Result<()>
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();
        let schema = compile_schema(&tool_name, &tool.input_schema)?;

        {
            let mut schemas = self.tool_schemas.write().await;
            schemas.insert(tool_name.clone(), schema);
        }

        {
            let mut tools = self.tools.write().await;
            tools.insert(tool_name.clone(), tool);
        }

        {
            let mut handlers = self.tool_handlers.write().await;
            handlers.insert(tool_name.clone(), Box::new(handler));
        }

        debug!("Registered tool: {}", tool_name);
        Ok(())
    }

    /// Register a resource with the server
    #[inline]
    pub async fn register_resource<H>(&self, resource: Resource, handler: H) -> Result<()>
    where
        H: ResourceHandler + 'static,
    {
        let resource_uri = resource.uri.clone();

        {
            let mut resources = self.resources.write().await;
            resources.insert(resource_uri.clone(), resource);
        }

        {
            let mut handlers = self.resource_handlers.write().await;
            handlers.insert(resource_uri.clone(), Box::new(handler));
        }

        debug!("Registered resource: {}", resource_uri);
        Ok(())
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(io::stdin(), io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC from `reader` until EOF
    #[inline]
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let response = match std::str::from_utf8(&buffer) {
                        Ok(line) => Arc::clone(&self).handle_line(line).await,
                        Err(e) => {
                            error!("Input line is not valid UTF-8: {}", e);
                            Some(parse_error_response())
                        }
                    };
                    if let Some(response) = response {
                        self.send_message(&mut writer, &response)
                            .await
                            .context("Failed to write response")?;
                    }
                }
                Err(e) => {
                    error!("Error reading from input: {}", e);
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Closed).await;

        info!("MCP server stopped");
        Ok(())
    }

    /// Handle one line of input, returning the message to send back if any
    #[inline]
    pub async fn handle_line(self: Arc<Self>, line: &str) -> Option<JsonRpcMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let raw_value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to parse JSON: {}", e);
                return Some(parse_error_response());
            }
        };

        match self.validator.validate_raw_message(&raw_value) {
            Ok(message) => MessageHandler::new(self).process_message(message).await,
            Err(e) => {
                e.log();
                // Echo the id back when the envelope carried a usable one
                let id = raw_value
                    .get("id")
                    .cloned()
                    .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
                Some(e.to_error_response(id))
            }
        }
    }

    /// Send a message to the client
    async fn send_message<W>(&self, writer: &mut W, message: &JsonRpcMessage) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let json = serde_json::to_string(message)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Get current connection state
    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.connection_state.write().await;
        if *state != next {
            debug!("Connection state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Snapshot of the server's health for monitoring
    #[inline]
    pub async fn health_status(&self) -> ServerHealthStatus {
        ServerHealthStatus {
            connection_state: self.connection_state().await,
            protocol_version: self.negotiated_version.read().await.clone(),
            tools_registered: self.tools.read().await.len(),
            resources_registered: self.resources.read().await.len(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Registered tool and resource names along with server identity
    #[inline]
    pub async fn server_statistics(&self) -> ServerStatistics {
        let mut registered_tools: Vec<String> = self.tools.read().await.keys().cloned().collect();
        registered_tools.sort();
        let mut registered_resources: Vec<String> =
            self.resources.read().await.keys().cloned().collect();
        registered_resources.sort();

        ServerStatistics {
            server_info: self.server_info.clone(),
            capabilities: self.capabilities.clone(),
            connection_state: self.connection_state().await,
            registered_tools,
            registered_resources,
        }
    }

    /// Tool definitions sorted by name
    #[inline]
    pub async fn list_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.tools.read().await.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }
}

impl MessageHandler {
    /// Create a new message handler
    #[inline]
    pub fn new(server: Arc<McpServer>) -> Self {
        Self { server }
    }

    /// Process an incoming message, returning the reply for requests
    #[inline]
    pub async fn process_message(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request).await),
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await;
                None
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_) => {
                warn!("Received unexpected response message from client");
                None
            }
        }
    }

    /// Handle a JSON-RPC request
    #[inline]
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        debug!("Handling request {:?}: {}", request.id, request.method);

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "ping" => self.handle_ping(),
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            "resources/list" => self.handle_list_resources().await,
            "resources/read" => self.handle_read_resource(request.params).await,
            _ => Err(McpError::MethodNotFound {
                method: request.method.clone(),
            }),
        };

        match response {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, request.id)),
            Err(e) => {
                e.log();
                e.to_error_response(Some(request.id))
            }
        }
    }

    /// Handle a JSON-RPC notification
    #[inline]
    pub async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => self.handle_initialized().await,
            "notifications/cancelled" => {
                debug!("Received cancellation notification: {:?}", notification.params);
            }
            _ => {
                warn!("Unknown notification method: {}", notification.method);
            }
        }
    }

    /// Handle initialize request
    #[inline]
    pub async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        if self.server.connection_state().await != ConnectionState::Uninitialized {
            return Err(McpError::ServerAlreadyInitialized);
        }

        let params = params.ok_or_else(|| McpError::InvalidParameters {
            message: "Initialize request missing parameters".to_string(),
        })?;
        self.server
            .validator
            .validate_method_params("initialize", &params)?;
        let params: InitializeParams = serde_json::from_value(params)?;

        if !self
            .server
            .validator
            .is_protocol_version_supported(&params.protocol_version)
        {
            return Err(McpError::UnsupportedProtocolVersion {
                version: params.protocol_version,
                supported: self.server.validator.supported_protocol_versions(),
            });
        }

        self.server.set_state(ConnectionState::Initializing).await;
        *self.server.negotiated_version.write().await = Some(params.protocol_version.clone());

        let result = InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: self.server.capabilities.clone(),
            server_info: self.server.server_info.clone(),
            instructions: self.server.instructions.clone(),
        };

        info!(
            "Client initialized: {} {}",
            params.client_info.name, params.client_info.version
        );
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_initialized(&self) {
        match self.server.connection_state().await {
            ConnectionState::Initializing => {
                self.server.set_state(ConnectionState::Ready).await;
                info!("Server ready to handle requests");
            }
            state => warn!("Ignoring initialized notification in state {:?}", state),
        }
    }

    async fn require_initialized(&self) -> McpResult<()> {
        match self.server.connection_state().await {
            ConnectionState::Initializing | ConnectionState::Ready => Ok(()),
            ConnectionState::Uninitialized | ConnectionState::Closed => {
                Err(McpError::ServerNotInitialized)
            }
        }
    }

    /// Handle list tools request
    #[inline]
    pub async fn handle_list_tools(&self) -> McpResult<Value> {
        self.require_initialized().await?;

        let result = ListToolsResult {
            tools: self.server.list_tools().await,
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Handle call tool request
    #[inline]
    pub async fn handle_call_tool(&self, params: Option<Value>) -> McpResult<Value> {
        self.require_initialized().await?;

        let params = params.ok_or_else(|| McpError::InvalidParameters {
            message: "Tool call request missing parameters".to_string(),
        })?;
        self.server
            .validator
            .validate_method_params("tools/call", &params)?;
        let mut params: CallToolParams = serde_json::from_value(params)?;

        // Explicit nulls count as omitted arguments
        let mut arguments = params.arguments.take().unwrap_or_default();
        arguments.retain(|_, value| !value.is_null());

        {
            let schemas = self.server.tool_schemas.read().await;
            let schema = schemas
                .get(&params.name)
                .ok_or_else(|| McpError::ToolNotFound {
                    name: params.name.clone(),
                })?;

            let arguments_value = Value::Object(arguments.clone());
            if let Some(violations) = schema_violations(schema, &arguments_value) {
                return Err(McpError::InvalidToolParameters {
                    tool: params.name.clone(),
                    message: violations,
                });
            }
        }
        params.arguments = Some(arguments);

        let handlers = self.server.tool_handlers.read().await;
        let handler = handlers
            .get(&params.name)
            .ok_or_else(|| McpError::ToolNotFound {
                name: params.name.clone(),
            })?;

        let tool_name = params.name.clone();
        debug!("Calling tool {}", tool_name);
        let result = handler
            .handle(params)
            .await
            .map_err(|e| McpError::from_tool_failure(&tool_name, e))?;

        if result.is_error == Some(true) {
            warn!("Tool {} reported an error: {}", tool_name, result.text_content());
        }

        Ok(serde_json::to_value(result)?)
    }

    /// Handle list resources request
    #[inline]
    pub async fn handle_list_resources(&self) -> McpResult<Value> {
        self.require_initialized().await?;

        let mut resources: Vec<Resource> =
            self.server.resources.read().await.values().cloned().collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));

        let result = ListResourcesResult { resources };
        Ok(serde_json::to_value(result)?)
    }

    /// Handle read resource request
    #[inline]
    pub async fn handle_read_resource(&self, params: Option<Value>) -> McpResult<Value> {
        self.require_initialized().await?;

        let params = params.ok_or_else(|| McpError::InvalidParameters {
            message: "Resource read request missing parameters".to_string(),
        })?;
        self.server
            .validator
            .validate_method_params("resources/read", &params)?;
        let params: ReadResourceParams = serde_json::from_value(params)?;

        let handlers = self.server.resource_handlers.read().await;
        let handler = handlers
            .get(&params.uri)
            .ok_or_else(|| McpError::ResourceNotFound {
                uri: params.uri.clone(),
            })?;

        let contents = handler
            .handle(&params.uri)
            .await
            .map_err(|e| McpError::ResourceAccessFailed {
                uri: params.uri.clone(),
                message: e.to_string(),
            })?;

        Ok(serde_json::to_value(ReadResourceResult { contents })?)
    }

    /// Handle ping request; allowed in every state
    #[inline]
    pub fn handle_ping(&self) -> McpResult<Value> {
        Ok(serde_json::json!({}))
    }
}
