//! MCP Tools Implementation
//!
//! Tool definitions and handlers for creating and reading ServiceNow records.
//! ServiceNow failures are reported as tool results with `isError` set so the
//! model can read them; only malformed calls become protocol errors.

use crate::config::ServerConfig;
use crate::mcp::errors::McpError;
use crate::mcp::protocol::*;
use crate::mcp::server::{McpServer, ToolHandler};
use crate::servicenow::catalog::{self, CatalogError};
use crate::servicenow::records::{
    BUSINESS_RULE_TABLE, BusinessRuleRequest, CLIENT_SCRIPT_TABLE, ClientScriptRequest,
    INCIDENT_TABLE, IncidentRequest, KB_ARTICLE_TABLE, KbArticleRequest, RecordListing,
    RecordProducerRequest, SLA_DEFINITION_TABLE, SlaDefinitionRequest, VariableSetRequest,
    field_or,
};
use crate::servicenow::{ServiceNowClient, TableQuery};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, info};

const UNKNOWN: &str = "UNKNOWN";

/// Deserialize validated tool arguments into a request type
fn parse_arguments<T: DeserializeOwned>(tool: &str, params: CallToolParams) -> Result<T> {
    let arguments = Value::Object(params.arguments.unwrap_or_default());
    serde_json::from_value(arguments).map_err(|e| {
        anyhow::Error::new(McpError::InvalidToolParameters {
            tool: tool.to_string(),
            message: e.to_string(),
        })
    })
}

fn variables_schema() -> Value {
    json!({
        "type": "array",
        "description": "Variables to add. Each entry may set name, label, type, mandatory, default_value, reference_table, help_text and description.",
        "items": {
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Variable name (default: variable_{index})"},
                "label": {"type": "string", "description": "Question text shown to the user"},
                "type": {
                    "type": "string",
                    "description": "string, integer, boolean, reference, choice, text, date, datetime, currency or price (default: string)"
                },
                "mandatory": {"type": "boolean"},
                "default_value": {"type": ["string", "number", "boolean"]},
                "reference_table": {"type": "string", "description": "Table referenced by reference variables"},
                "help_text": {"type": "string"},
                "description": {"type": "string"}
            }
        }
    })
}

/// Incident creation tool handler
pub struct CreateIncidentHandler {
    client: Arc<ServiceNowClient>,
}

impl CreateIncidentHandler {
    #[inline]
    pub fn new(client: Arc<ServiceNowClient>) -> Self {
        Self { client }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "create_incident".to_string(),
            description: Some("Creates a new incident record in ServiceNow.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "short_description": {
                        "type": "string",
                        "description": "A brief summary of the incident"
                    },
                    "description": {
                        "type": "string",
                        "description": "A detailed description (defaults to the short description)"
                    },
                    "caller_id": {
                        "type": "string",
                        "description": "The user reporting the incident, by name or sys_id"
                    },
                    "urgency": {
                        "type": "string",
                        "description": "Urgency: 1-High, 2-Medium, 3-Low (default: 3)"
                    },
                    "impact": {
                        "type": "string",
                        "description": "Impact: 1-High, 2-Medium, 3-Low (default: 3)"
                    }
                },
                "required": ["short_description"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateIncidentHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let request: IncidentRequest = parse_arguments("create_incident", params)?;
        debug!("Creating incident: {}", request.short_description);

        match self
            .client
            .create_record(INCIDENT_TABLE, request.payload())
            .await
        {
            Ok(record) => {
                let number = field_or(&record, "number", UNKNOWN);
                info!("Created incident {}", number);
                Ok(CallToolResult::text(format!(
                    "Successfully created incident {} (Sys ID: {}).",
                    number,
                    field_or(&record, "sys_id", UNKNOWN)
                )))
            }
            Err(e) => {
                error!("Error creating incident: {}", e);
                Ok(CallToolResult::error(format!("Error creating incident: {}", e)))
            }
        }
    }
}

/// Knowledge article creation tool handler
pub struct CreateKbArticleHandler {
    client: Arc<ServiceNowClient>,
}

impl CreateKbArticleHandler {
    #[inline]
    pub fn new(client: Arc<ServiceNowClient>) -> Self {
        Self { client }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "create_kb_article".to_string(),
            description: Some(
                "Creates a new knowledge base article in ServiceNow.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "short_description": {
                        "type": "string",
                        "description": "The title of the article"
                    },
                    "article_body": {
                        "type": "string",
                        "description": "The article content, HTML or plain text"
                    },
                    "kb_knowledge_base": {
                        "type": "string",
                        "description": "The sys_id or name of the knowledge base"
                    },
                    "workflow_state": {
                        "type": "string",
                        "description": "Initial state such as draft, review or published (default: draft)"
                    }
                },
                "required": ["short_description", "article_body"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateKbArticleHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let request: KbArticleRequest = parse_arguments("create_kb_article", params)?;

        match self
            .client
            .create_record(KB_ARTICLE_TABLE, request.payload())
            .await
        {
            Ok(record) => {
                let number = field_or(&record, "number", UNKNOWN);
                info!("Created KB article {}", number);
                Ok(CallToolResult::text(format!(
                    "Successfully created KB article {} (Sys ID: {}).",
                    number,
                    field_or(&record, "sys_id", UNKNOWN)
                )))
            }
            Err(e) => {
                error!("Error creating KB article: {}", e);
                Ok(CallToolResult::error(format!(
                    "Error creating KB article: {}",
                    e
                )))
            }
        }
    }
}

/// Client script creation tool handler
pub struct CreateClientScriptHandler {
    client: Arc<ServiceNowClient>,
}

impl CreateClientScriptHandler {
    #[inline]
    pub fn new(client: Arc<ServiceNowClient>) -> Self {
        Self { client }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "create_client_script".to_string(),
            description: Some("Creates a new Client Script in ServiceNow.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "The name of the client script"},
                    "table": {
                        "type": "string",
                        "description": "The table the script applies to, e.g. 'incident'"
                    },
                    "script": {"type": "string", "description": "The client-side JavaScript"},
                    "ui_type": {
                        "type": "string",
                        "description": "Where the script runs: all, desktop, mobile or service_portal (default: all)"
                    },
                    "script_type": {
                        "type": "string",
                        "description": "When the script runs: onLoad, onChange, onSubmit or onCellEdit (default: onChange)"
                    },
                    "field_name": {
                        "type": "string",
                        "description": "The field that triggers the script; required for onChange"
                    },
                    "is_active": {"type": "boolean", "description": "Whether the script is active (default: true)"}
                },
                "required": ["name", "table", "script"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateClientScriptHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let request: ClientScriptRequest = parse_arguments("create_client_script", params)?;

        let payload = match request.payload() {
            Ok(payload) => payload,
            Err(e) => return Ok(CallToolResult::error(format!("Error: {}", e))),
        };

        match self.client.create_record(CLIENT_SCRIPT_TABLE, payload).await {
            Ok(record) => {
                let name = field_or(&record, "name", &request.name);
                info!("Created client script '{}'", name);
                Ok(CallToolResult::text(format!(
                    "Successfully created Client Script '{}' (Sys ID: {}).",
                    name,
                    field_or(&record, "sys_id", UNKNOWN)
                )))
            }
            Err(e) => {
                error!("Error creating Client Script: {}", e);
                Ok(CallToolResult::error(format!(
                    "Error creating Client Script: {}",
                    e
                )))
            }
        }
    }
}

/// Business rule creation tool handler
pub struct CreateBusinessRuleHandler {
    client: Arc<ServiceNowClient>,
}

impl CreateBusinessRuleHandler {
    #[inline]
    pub fn new(client: Arc<ServiceNowClient>) -> Self {
        Self { client }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "create_business_rule".to_string(),
            description: Some("Creates a new Business Rule in ServiceNow.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "The name of the business rule"},
                    "table": {
                        "type": "string",
                        "description": "The table the rule applies to, e.g. 'incident'"
                    },
                    "script": {"type": "string", "description": "The server-side JavaScript"},
                    "when": {
                        "type": "string",
                        "description": "When the rule runs: before, after, async or display (default: before)"
                    },
                    "order": {"type": "integer", "description": "Execution order, lower runs first (default: 100)"},
                    "action_insert": {"type": "boolean", "description": "Run on insert (default: true)"},
                    "action_update": {"type": "boolean", "description": "Run on update (default: true)"},
                    "action_delete": {"type": "boolean", "description": "Run on delete (default: false)"},
                    "action_query": {"type": "boolean", "description": "Run on query (default: false)"},
                    "is_active": {"type": "boolean", "description": "Whether the rule is active (default: true)"}
                },
                "required": ["name", "table", "script"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateBusinessRuleHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let request: BusinessRuleRequest = parse_arguments("create_business_rule", params)?;

        match self
            .client
            .create_record(BUSINESS_RULE_TABLE, request.payload())
            .await
        {
            Ok(record) => {
                let name = field_or(&record, "name", &request.name);
                info!("Created business rule '{}'", name);
                Ok(CallToolResult::text(format!(
                    "Successfully created Business Rule '{}' (Sys ID: {}).",
                    name,
                    field_or(&record, "sys_id", UNKNOWN)
                )))
            }
            Err(e) => {
                error!("Error creating Business Rule: {}", e);
                Ok(CallToolResult::error(format!(
                    "Error creating Business Rule: {}",
                    e
                )))
            }
        }
    }
}

/// SLA definition creation tool handler
pub struct CreateSlaDefinitionHandler {
    client: Arc<ServiceNowClient>,
}

impl CreateSlaDefinitionHandler {
    #[inline]
    pub fn new(client: Arc<ServiceNowClient>) -> Self {
        Self { client }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "create_sla_definition".to_string(),
            description: Some(
                "Creates a basic SLA Definition in ServiceNow. Conditions are encoded queries."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "The name of the SLA definition"},
                    "table": {
                        "type": "string",
                        "description": "The table the SLA applies to, e.g. 'incident'"
                    },
                    "duration_seconds": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Target duration in seconds"
                    },
                    "start_condition": {"type": "string", "description": "Encoded query for when the SLA attaches"},
                    "stop_condition": {"type": "string", "description": "Encoded query for when the SLA completes"},
                    "pause_condition": {"type": "string", "description": "Encoded query for when the SLA pauses"}
                },
                "required": ["name", "table", "duration_seconds"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateSlaDefinitionHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let request: SlaDefinitionRequest = parse_arguments("create_sla_definition", params)?;

        match self
            .client
            .create_record(SLA_DEFINITION_TABLE, request.payload())
            .await
        {
            Ok(record) => {
                let name = field_or(&record, "name", &request.name);
                info!("Created SLA definition '{}'", name);
                Ok(CallToolResult::text(format!(
                    "Successfully created SLA Definition '{}' (Sys ID: {}). Conditions should be verified in ServiceNow UI.",
                    name,
                    field_or(&record, "sys_id", UNKNOWN)
                )))
            }
            Err(e) => {
                error!("Error creating SLA Definition: {}", e);
                Ok(CallToolResult::error(format!(
                    "Error creating SLA Definition: {}",
                    e
                )))
            }
        }
    }
}

fn catalog_result(
    kind: &str,
    outcome: Result<catalog::CatalogOutcome, CatalogError>,
) -> CallToolResult {
    match outcome {
        Ok(outcome) => CallToolResult::text(outcome.summary(kind)),
        Err(e) => {
            error!("Error creating {}: {}", kind, e);
            CallToolResult::error(format!("Error creating {}: {}", kind, e))
        }
    }
}

/// Record producer creation tool handler
pub struct CreateRecordProducerHandler {
    client: Arc<ServiceNowClient>,
}

impl CreateRecordProducerHandler {
    #[inline]
    pub fn new(client: Arc<ServiceNowClient>) -> Self {
        Self { client }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "create_record_producer".to_string(),
            description: Some(
                "Creates a new Record Producer in the Service Catalog, optionally with variables and variable sets."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Name shown in the catalog"},
                    "table_name": {
                        "type": "string",
                        "description": "Table the produced record is created in, e.g. 'incident'"
                    },
                    "short_description": {"type": "string", "description": "Catalog description (defaults to the name)"},
                    "category_sys_id": {"type": "string", "description": "sys_id of the catalog category"},
                    "script": {"type": "string", "description": "Server-side script run on submit"},
                    "variables": variables_schema(),
                    "variable_set_ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "sys_ids of variable sets to include"
                    }
                },
                "required": ["name", "table_name"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateRecordProducerHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let request: RecordProducerRequest = parse_arguments("create_record_producer", params)?;
        let outcome = catalog::create_record_producer(&self.client, &request).await;
        Ok(catalog_result("Record Producer", outcome))
    }
}

/// Variable set creation tool handler
pub struct CreateVariableSetHandler {
    client: Arc<ServiceNowClient>,
}

impl CreateVariableSetHandler {
    #[inline]
    pub fn new(client: Arc<ServiceNowClient>) -> Self {
        Self { client }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "create_variable_set".to_string(),
            description: Some(
                "Creates a new Variable Set to be reused across catalog items.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "The name of the variable set"},
                    "description": {"type": "string", "description": "Description (defaults to the name)"},
                    "variables": variables_schema()
                },
                "required": ["name"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for CreateVariableSetHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let request: VariableSetRequest = parse_arguments("create_variable_set", params)?;
        let outcome = catalog::create_variable_set(&self.client, &request).await;
        Ok(catalog_result("Variable Set", outcome))
    }
}

/// Read-only listing of recent records from one table
pub struct ListRecordsHandler {
    client: Arc<ServiceNowClient>,
    listing: RecordListing,
    limits: ServerConfig,
}

impl ListRecordsHandler {
    #[inline]
    pub fn new(client: Arc<ServiceNowClient>, listing: RecordListing, limits: ServerConfig) -> Self {
        Self {
            client,
            listing,
            limits,
        }
    }

    #[inline]
    pub fn tool_name(listing: RecordListing) -> &'static str {
        match listing {
            RecordListing::Incidents => "get_incidents",
            RecordListing::ChangeRequests => "get_change_requests",
            RecordListing::Users => "get_users",
        }
    }

    #[inline]
    pub fn tool_definition(listing: RecordListing, limits: &ServerConfig) -> Tool {
        Tool {
            name: Self::tool_name(listing).to_string(),
            description: Some(format!("Retrieve recent {} from ServiceNow.", listing.noun())),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": format!(
                            "Number of {} to retrieve (default {}, max {})",
                            listing.noun(),
                            limits.default_list_limit,
                            limits.max_list_limit
                        )
                    }
                },
                "additionalProperties": false
            }),
        }
    }
}

/// JSON Schema integers include floats with no fractional part, such as `10.0`
fn integral(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|number| number.trunc() as i64))
}

#[async_trait]
impl ToolHandler for ListRecordsHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let limit = params
            .arguments
            .as_ref()
            .and_then(|args| args.get("limit"))
            .and_then(integral);
        let limit = self.limits.clamp_limit(limit);

        debug!("Retrieving {} {}", limit, self.listing.noun());

        match self
            .client
            .query_table(self.listing.table(), TableQuery::recent(limit))
            .await
        {
            Ok(records) => Ok(CallToolResult::text(self.listing.summarize(&records))),
            Err(e) => {
                error!("Error retrieving {}: {}", self.listing.noun(), e);
                Ok(CallToolResult::error(format!(
                    "Error retrieving {}: {}",
                    self.listing.noun(),
                    e
                )))
            }
        }
    }
}

const LISTINGS: [RecordListing; 3] = [
    RecordListing::Incidents,
    RecordListing::ChangeRequests,
    RecordListing::Users,
];

/// Every tool the server exposes, in registration order
#[inline]
pub fn tool_definitions(limits: &ServerConfig) -> Vec<Tool> {
    let mut tools = vec![
        CreateIncidentHandler::tool_definition(),
        CreateKbArticleHandler::tool_definition(),
        CreateClientScriptHandler::tool_definition(),
        CreateBusinessRuleHandler::tool_definition(),
        CreateSlaDefinitionHandler::tool_definition(),
        CreateRecordProducerHandler::tool_definition(),
        CreateVariableSetHandler::tool_definition(),
    ];
    tools.extend(
        LISTINGS
            .iter()
            .map(|listing| ListRecordsHandler::tool_definition(*listing, limits)),
    );
    tools
}

/// Register every ServiceNow tool on `server`
#[inline]
pub async fn register_tools(
    server: &McpServer,
    client: Arc<ServiceNowClient>,
    limits: &ServerConfig,
) -> Result<()> {
    server
        .register_tool(
            CreateIncidentHandler::tool_definition(),
            CreateIncidentHandler::new(Arc::clone(&client)),
        )
        .await
        .context("Failed to register create_incident tool")?;
    server
        .register_tool(
            CreateKbArticleHandler::tool_definition(),
            CreateKbArticleHandler::new(Arc::clone(&client)),
        )
        .await
        .context("Failed to register create_kb_article tool")?;
    server
        .register_tool(
            CreateClientScriptHandler::tool_definition(),
            CreateClientScriptHandler::new(Arc::clone(&client)),
        )
        .await
        .context("Failed to register create_client_script tool")?;
    server
        .register_tool(
            CreateBusinessRuleHandler::tool_definition(),
            CreateBusinessRuleHandler::new(Arc::clone(&client)),
        )
        .await
        .context("Failed to register create_business_rule tool")?;
    server
        .register_tool(
            CreateSlaDefinitionHandler::tool_definition(),
            CreateSlaDefinitionHandler::new(Arc::clone(&client)),
        )
        .await
        .context("Failed to register create_sla_definition tool")?;
    server
        .register_tool(
            CreateRecordProducerHandler::tool_definition(),
            CreateRecordProducerHandler::new(Arc::clone(&client)),
        )
        .await
        .context("Failed to register create_record_producer tool")?;
    server
        .register_tool(
            CreateVariableSetHandler::tool_definition(),
            CreateVariableSetHandler::new(Arc::clone(&client)),
        )
        .await
        .context("Failed to register create_variable_set tool")?;

    for listing in LISTINGS {
        server
            .register_tool(
                ListRecordsHandler::tool_definition(listing, limits),
                ListRecordsHandler::new(Arc::clone(&client), listing, limits.clone()),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to register {} tool",
                    ListRecordsHandler::tool_name(listing)
                )
            })?;
    }

    Ok(())
}
