#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! MCP Server Integration Tests
//!
//! Drives the fully assembled server through JSON-RPC lines against a mocked
//! ServiceNow instance.

use serde_json::{Value, json};
use servicenow_mcp::config::{Config, ServiceNowConfig};
use servicenow_mcp::mcp::protocol::{MCP_VERSION, error_codes};
use servicenow_mcp::mcp::resources::VARIABLE_TYPES_URI;
use servicenow_mcp::mcp::{ConnectionState, McpServer, build_server};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(servicenow: &MockServer) -> Config {
    Config {
        servicenow: ServiceNowConfig {
            instance: servicenow.uri(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            retry_attempts: 1,
            ..ServiceNowConfig::default()
        },
        ..Config::default()
    }
}

async fn ready_server(servicenow: &MockServer) -> Arc<McpServer> {
    let server = Arc::new(
        build_server(&config_for(servicenow))
            .await
            .expect("server should build"),
    );

    let reply = send(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "integration", "version": "1.0"}
            }
        }),
    )
    .await;
    assert_eq!(reply["result"]["protocolVersion"], MCP_VERSION);

    send_notification(&server, "notifications/initialized").await;
    assert_eq!(server.connection_state().await, ConnectionState::Ready);

    server
}

async fn send(server: &Arc<McpServer>, message: Value) -> Value {
    let reply = Arc::clone(server)
        .handle_line(&message.to_string())
        .await
        .expect("requests get a reply");
    serde_json::to_value(reply).expect("reply serializes")
}

async fn send_notification(server: &Arc<McpServer>, method: &str) {
    let reply = Arc::clone(server)
        .handle_line(&json!({"jsonrpc": "2.0", "method": method}).to_string())
        .await;
    assert!(reply.is_none());
}

async fn call_tool(server: &Arc<McpServer>, name: &str, arguments: Value) -> Value {
    send(
        server,
        json!({
            "jsonrpc": "2.0",
            "id": name,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        }),
    )
    .await
}

fn tool_text(reply: &Value) -> &str {
    reply["result"]["content"][0]["text"]
        .as_str()
        .expect("tool result has text content")
}

/// The server lists every tool and the variable types resource
#[tokio::test]
async fn lists_tools_and_resources() {
    let servicenow = MockServer::start().await;
    let server = ready_server(&servicenow).await;

    let tools = send(&server, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
    let tools = tools["result"]["tools"].as_array().expect("tools array");
    assert_eq!(tools.len(), 10);
    assert!(tools.iter().all(|tool| tool["inputSchema"]["type"] == "object"));

    let resources = send(
        &server,
        json!({"jsonrpc": "2.0", "id": 2, "method": "resources/list"}),
    )
    .await;
    assert_eq!(
        resources["result"]["resources"][0]["uri"],
        VARIABLE_TYPES_URI
    );

    let contents = send(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "resources/read",
            "params": {"uri": VARIABLE_TYPES_URI}
        }),
    )
    .await;
    let text = contents["result"]["contents"][0]["text"]
        .as_str()
        .expect("resource text");
    let types: Value = serde_json::from_str(text).expect("resource is json");
    assert_eq!(types["datetime"], "4");
}

/// Creating an incident reports the number and sys_id ServiceNow returns
#[tokio::test]
async fn create_incident_success() {
    let servicenow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/now/table/incident"))
        .and(body_partial_json(json!({
            "short_description": "VPN down",
            "description": "VPN down",
            "urgency": "1",
            "impact": "3"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"number": "INC0010042", "sys_id": "9d385017"}
        })))
        .expect(1)
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(
        &server,
        "create_incident",
        json!({"short_description": "VPN down", "urgency": "1", "caller_id": null}),
    )
    .await;

    assert_eq!(reply["result"]["isError"], false);
    assert_eq!(
        tool_text(&reply),
        "Successfully created incident INC0010042 (Sys ID: 9d385017)."
    );
}

/// ServiceNow rejections come back as tool errors, not protocol errors
#[tokio::test]
async fn create_incident_api_error_is_a_tool_error() {
    let servicenow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/now/table/incident"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"message": "Insufficient rights", "detail": "ACL failed"}
        })))
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(&server, "create_incident", json!({"short_description": "x"})).await;

    assert!(reply.get("error").is_none());
    assert_eq!(reply["result"]["isError"], true);
    assert_eq!(
        tool_text(&reply),
        "Error creating incident: ServiceNow API Error: Insufficient rights - ACL failed"
    );
}

/// Missing required arguments never reach ServiceNow
#[tokio::test]
async fn missing_required_argument_is_invalid_params() {
    let servicenow = MockServer::start().await;
    let server = ready_server(&servicenow).await;

    let reply = call_tool(&server, "create_kb_article", json!({"short_description": "Only title"})).await;

    assert_eq!(reply["error"]["code"], error_codes::INVALID_PARAMS);
    assert!(
        servicenow
            .received_requests()
            .await
            .unwrap_or_default()
            .is_empty()
    );
}

#[tokio::test]
async fn client_script_on_change_needs_field_name() {
    let servicenow = MockServer::start().await;
    let server = ready_server(&servicenow).await;

    let reply = call_tool(
        &server,
        "create_client_script",
        json!({"name": "Check", "table": "incident", "script": "function onChange() {}"}),
    )
    .await;

    assert_eq!(reply["result"]["isError"], true);
    assert_eq!(
        tool_text(&reply),
        "Error: 'field_name' is required when script_type is 'onChange'."
    );
}

#[tokio::test]
async fn business_rule_falls_back_to_requested_name() {
    let servicenow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/now/table/sys_script"))
        .and(body_partial_json(json!({"when": "after", "collection": "problem"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"sys_id": "br01"}
        })))
        .expect(1)
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(
        &server,
        "create_business_rule",
        json!({"name": "Notify owner", "table": "problem", "script": "gs.log('x');", "when": "after"}),
    )
    .await;

    assert_eq!(
        tool_text(&reply),
        "Successfully created Business Rule 'Notify owner' (Sys ID: br01)."
    );
}

#[tokio::test]
async fn sla_definition_uses_glide_duration() {
    let servicenow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/now/table/contract_sla"))
        .and(body_partial_json(json!({
            "target_table": "incident",
            "duration": "1970-01-01 08:00:00",
            "duration_type": "glide_duration"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"sys_id": "sla01", "name": "P2 response"}
        })))
        .expect(1)
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(
        &server,
        "create_sla_definition",
        json!({"name": "P2 response", "table": "incident", "duration_seconds": 28800}),
    )
    .await;

    assert_eq!(
        tool_text(&reply),
        "Successfully created SLA Definition 'P2 response' (Sys ID: sla01). Conditions should be verified in ServiceNow UI."
    );
}

#[tokio::test]
async fn record_producer_without_sys_id_is_a_tool_error() {
    let servicenow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/now/table/sc_cat_item_producer"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(
        &server,
        "create_record_producer",
        json!({"name": "Report outage", "table_name": "incident"}),
    )
    .await;

    assert_eq!(reply["result"]["isError"], true);
    assert_eq!(
        tool_text(&reply),
        "Error creating Record Producer: No sys_id returned from ServiceNow."
    );
}

#[tokio::test]
async fn variable_set_with_no_variables() {
    let servicenow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/now/table/io_set"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"sys_id": "set42", "name": "Requester"}
        })))
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(&server, "create_variable_set", json!({"name": "Requester"})).await;

    assert_eq!(
        tool_text(&reply),
        "Successfully created Variable Set 'Requester' (Sys ID: set42). No variables were added."
    );
}

/// Listing tools clamp the limit and render display values
#[tokio::test]
async fn get_incidents_formats_records() {
    let servicenow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/now/table/incident"))
        .and(query_param("sysparm_limit", "100"))
        .and(query_param("sysparm_display_value", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {
                    "number": "INC0000001",
                    "short_description": "Email outage",
                    "state": "In Progress",
                    "priority": "1 - Critical",
                    "caller_id": {"display_value": "Fred Luddy", "link": "https://x"}
                },
                {"number": "INC0000002", "state": "New"}
            ]
        })))
        .expect(1)
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(&server, "get_incidents", json!({"limit": 250})).await;

    assert_eq!(
        tool_text(&reply),
        "Retrieved 2 incidents:\n\
         • INC0000001: Email outage (State: In Progress, Priority: 1 - Critical)\n\
         • INC0000002: No description (State: New, Priority: N/A)"
    );
}

#[tokio::test]
async fn get_users_empty_result() {
    let servicenow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/now/table/sys_user"))
        .and(query_param("sysparm_limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
        .expect(1)
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(&server, "get_users", json!({})).await;

    assert_eq!(reply["result"]["isError"], false);
    assert_eq!(tool_text(&reply), "No users found.");
}

#[tokio::test]
async fn get_change_requests_server_error() {
    let servicenow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/now/table/change_request"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Error"))
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(&server, "get_change_requests", json!({"limit": 3})).await;

    assert_eq!(reply["result"]["isError"], true);
    assert_eq!(
        tool_text(&reply),
        "Error retrieving change requests: HTTP Error: 500 - Internal Error"
    );
}

#[tokio::test]
async fn float_limit_is_honoured() {
    let servicenow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/now/table/incident"))
        .and(query_param("sysparm_limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
        .expect(1)
        .mount(&servicenow)
        .await;

    let server = ready_server(&servicenow).await;
    let reply = call_tool(&server, "get_incidents", json!({"limit": 10.0})).await;

    assert_eq!(tool_text(&reply), "No incidents found.");
}
