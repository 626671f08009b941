//! MCP (Model Context Protocol) Server Implementation
//!
//! An MCP server speaking JSON-RPC 2.0 over stdio (protocol version
//! 2025-06-18) that exposes ServiceNow record tools.


pub mod errors;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;
pub mod validation;

pub use errors::{McpError, McpResult};
pub use server::{ConnectionState, McpServer, MessageHandler, ResourceHandler, ToolHandler};

use crate::config::Config;
use crate::servicenow::ServiceNowClient;
use anyhow::{Context, Result};
use std::sync::Arc;

pub const SERVER_NAME: &str = "servicenow-mcp";

const INSTRUCTIONS: &str = "Create and read ServiceNow records through the Table API. \
    Create tools report ServiceNow failures as tool errors; read the message and adjust the arguments.";

/// Build a server with every ServiceNow tool and resource registered
#[inline]
pub async fn build_server(config: &Config) -> Result<McpServer> {
    let client = Arc::new(
        ServiceNowClient::new(&config.servicenow).context("Failed to create ServiceNow client")?,
    );

    let server = McpServer::new(SERVER_NAME.to_string(), env!("CARGO_PKG_VERSION").to_string())
        .context("Failed to create MCP server")?
        .with_instructions(INSTRUCTIONS);

    tools::register_tools(&server, client, &config.server).await?;
    server
        .register_resource(
            resources::VariableTypesResource::resource_definition(),
            resources::VariableTypesResource,
        )
        .await
        .context("Failed to register variable types resource")?;

    Ok(server)
}
