use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::mcp::tools::tool_definitions;
use crate::mcp::{SERVER_NAME, build_server};
use crate::servicenow::ServiceNowClient;

/// Start the MCP server on stdio.
///
/// Stdout carries the protocol, so everything here reports through tracing
/// or stderr.
#[inline]
pub async fn serve_mcp() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    if let Err(e) = config.require_credentials() {
        eprintln!("Error: {}", e);
        eprintln!(
            "Set SERVICENOW_INSTANCE, SERVICENOW_USERNAME and SERVICENOW_PASSWORD, or run '{} config'.",
            SERVER_NAME
        );
        return Err(e.into());
    }

    let instance = config.servicenow.instance_url()?;
    info!("Starting MCP server for ServiceNow instance {}", instance);

    // A failed check is only a warning; the tools report connection errors themselves
    let client = ServiceNowClient::new(&config.servicenow)?.with_retry_attempts(1);
    match client.ping().await {
        Ok(()) => info!("✅ ServiceNow reachable at {}", instance),
        Err(e) => warn!("⚠️  ServiceNow connectivity check failed: {}", e),
    }

    let server = Arc::new(build_server(&config).await?);

    let stats = server.server_statistics().await;
    info!(
        "MCP server initialized with tools: {}",
        stats.registered_tools.join(", ")
    );

    tokio::select! {
        result = Arc::clone(&server).serve_stdio() => {
            match result {
                Ok(()) => info!("MCP server stopped normally"),
                Err(e) => {
                    error!("MCP server error: {}", e);
                    return Err(e);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt signal, shutting down");
        }
    }

    let health = server.health_status().await;
    info!(
        "Shutdown complete after {}s (state: {:?})",
        health.uptime_seconds, health.connection_state
    );

    Ok(())
}

/// Report configuration completeness and ServiceNow connectivity
#[inline]
pub async fn show_status() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    println!("📊 ServiceNow MCP Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("⚙️  Configuration:");
    println!("   File: {}", config.config_file_path().display());
    if let Err(e) = config.require_credentials() {
        println!("   ❌ Incomplete: {}", e);
        println!("   Run '{} config' to finish setup.", SERVER_NAME);
        return Ok(());
    }
    println!("   ✅ Credentials present for user '{}'", config.servicenow.username);
    println!(
        "   ⏱️  Timeout: {}s, retries: {}",
        config.servicenow.timeout_seconds, config.servicenow.retry_attempts
    );

    println!();
    println!("🌐 ServiceNow Status:");
    let client = ServiceNowClient::new(&config.servicenow)?;
    match client.ping().await {
        Ok(()) => println!("   ✅ Connected to {}", client.base_url()),
        Err(e) => println!("   ❌ {} - {}", client.base_url(), e),
    }

    println!();
    println!(
        "🧰 Tools: {} registered",
        tool_definitions(&config.server).len()
    );

    Ok(())
}

/// Print the tools the server exposes
#[inline]
pub fn list_tools() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let tools = tool_definitions(&config.server);

    println!("ServiceNow MCP tools ({} total):", tools.len());
    println!();
    for tool in &tools {
        println!("🔧 {}", tool.name);
        if let Some(description) = &tool.description {
            println!("   {}", description);
        }

        let required: Vec<&str> = tool.input_schema["required"]
            .as_array()
            .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default();
        if !required.is_empty() {
            println!("   Required: {}", required.join(", "));
        }
    }

    Ok(())
}
