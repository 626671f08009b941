use super::*;
use crate::servicenow::catalog::{create_record_producer, create_variable_set};
use crate::servicenow::records::{RecordProducerRequest, VariableSetRequest};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ServiceNowConfig {
    ServiceNowConfig {
        instance: server.uri(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        ..ServiceNowConfig::default()
    }
}

fn client_for(server: &MockServer) -> ServiceNowClient {
    ServiceNowClient::new(&config_for(server))
        .expect("client should build")
        .with_retry_delay(Duration::from_millis(10))
}

#[test]
fn client_configuration() {
    let config = ServiceNowConfig {
        instance: "dev12345.service-now.com".to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        retry_attempts: 4,
        ..ServiceNowConfig::default()
    };
    let client = ServiceNowClient::new(&config).expect("client should build");

    assert_eq!(client.base_url().as_str(), "https://dev12345.service-now.com/");
    assert_eq!(client.authorization, "Basic YWRtaW46c2VjcmV0");
    assert_eq!(client.retry_attempts, 4);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);

    let rendered = format!("{:?}", client);
    assert!(!rendered.contains("YWRtaW46c2VjcmV0"));
}

#[test]
fn table_names() {
    assert!(validate_table_name("incident").is_ok());
    assert!(validate_table_name("sys_script_client").is_ok());
    assert!(validate_table_name("").is_err());
    assert!(validate_table_name("incident/../sys_user").is_err());
    assert!(validate_table_name("incident?sysparm_limit=1").is_err());
}

#[test]
fn interpret_success_responses() {
    let created = interpret_response(201, r#"{"result": {"sys_id": "abc", "number": "INC001"}}"#)
        .expect("201 with result should succeed");
    assert_eq!(created["number"], "INC001");

    let no_content = interpret_response(204, "").expect("204 should succeed");
    assert_eq!(no_content["message"], "Operation successful (No Content)");

    let bare_created = interpret_response(201, "{}").expect("201 without result should succeed");
    assert_eq!(bare_created["message"], "Record created");

    let bare_ok = interpret_response(200, r#"{"status": "ok"}"#).expect("200 without result");
    assert_eq!(bare_ok, json!({}));
}

#[test]
fn empty_bodies_only_succeed_for_no_content() {
    assert!(matches!(
        interpret_response(200, ""),
        Err(ServiceNowError::Decode(_))
    ));
    assert!(matches!(
        interpret_response(201, "  \n"),
        Err(ServiceNowError::Decode(_))
    ));
    assert!(interpret_response(204, "").is_ok());
}

#[test]
fn interpret_error_responses() {
    let api = interpret_response(
        400,
        r#"{"error": {"message": "Invalid table", "detail": "Table does not exist"}, "status": "failure"}"#,
    )
    .expect_err("400 should fail");
    assert_eq!(
        api.to_string(),
        "ServiceNow API Error: Invalid table - Table does not exist"
    );
    assert_eq!(api.status(), Some(400));
    assert!(!api.is_retryable());

    let missing_detail = interpret_response(403, r#"{"error": {}}"#).expect_err("403 should fail");
    assert_eq!(
        missing_detail.to_string(),
        r#"ServiceNow API Error: Unknown ServiceNow Error - {"error": {}}"#
    );

    let http = interpret_response(502, "<html>Bad Gateway</html>").expect_err("502 should fail");
    assert_eq!(http.to_string(), "HTTP Error: 502 - <html>Bad Gateway</html>");
    assert!(http.is_retryable());

    assert!(interpret_response(200, "not json").is_err());
}

#[test]
fn error_bodies_without_error_details_are_http_errors() {
    let string_error = interpret_response(401, r#"{"error": "User Not Authenticated"}"#)
        .expect_err("401 should fail");
    assert_eq!(
        string_error.to_string(),
        r#"HTTP Error: 401 - {"error": "User Not Authenticated"}"#
    );

    let array_body = interpret_response(500, "[1, 2]").expect_err("500 should fail");
    assert_eq!(array_body.to_string(), "HTTP Error: 500 - [1, 2]");

    let no_error_member = interpret_response(404, r#"{"status": "failure"}"#)
        .expect_err("404 should fail");
    assert_eq!(
        no_error_member.to_string(),
        r#"ServiceNow API Error: Unknown ServiceNow Error - {"status": "failure"}"#
    );
}

#[test]
fn retryable_errors() {
    assert!(ServiceNowError::Connection("refused".to_string()).is_retryable());
    assert!(
        ServiceNowError::Http {
            status: 429,
            body: String::new()
        }
        .is_retryable()
    );
    assert!(
        !ServiceNowError::Http {
            status: 404,
            body: String::new()
        }
        .is_retryable()
    );
    assert!(!ServiceNowError::InvalidTable("x y".to_string()).is_retryable());
}

#[tokio::test]
async fn create_record_posts_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/incident"))
        .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(json!({"short_description": "Printer jam"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"sys_id": "46d44a", "number": "INC0010001"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .create_record("incident", json!({"short_description": "Printer jam"}))
        .await
        .expect("create should succeed");

    assert_eq!(result["number"], "INC0010001");
    assert_eq!(result["sys_id"], "46d44a");
}

#[tokio::test]
async fn create_record_rejects_empty_created_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/incident"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = client
        .create_record("incident", json!({"short_description": "Printer jam"}))
        .await;

    assert!(matches!(outcome, Err(ServiceNowError::Decode(_))));
}

#[tokio::test]
async fn create_record_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/incident"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client
        .create_record("incident", json!({"short_description": "x"}))
        .await
        .expect_err("503 should fail");

    assert_eq!(error.to_string(), "HTTP Error: 503 - busy");
}

#[tokio::test]
async fn create_record_surfaces_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/sys_script"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Operation Failed", "detail": "ACL denied"},
            "status": "failure"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client
        .create_record("sys_script", json!({"name": "rule"}))
        .await
        .expect_err("400 should fail");

    assert!(matches!(error, ServiceNowError::Api { status: 400, .. }));
    assert_eq!(
        error.to_string(),
        "ServiceNow API Error: Operation Failed - ACL denied"
    );
}

#[tokio::test]
async fn query_table_sends_paging_parameters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/incident"))
        .and(query_param("sysparm_limit", "3"))
        .and(query_param("sysparm_display_value", "true"))
        .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"number": "INC001", "short_description": "One"},
                {"number": "INC002", "short_description": "Two"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let records = client
        .query_table("incident", TableQuery::recent(3))
        .await
        .expect("query should succeed");

    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["number"], "INC002");
}

#[tokio::test]
async fn query_table_retries_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/change_request"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/change_request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let records = client
        .query_table("change_request", TableQuery::recent(5))
        .await
        .expect("third attempt should succeed");

    assert!(records.is_empty());
}

#[tokio::test]
async fn query_table_gives_up_after_retry_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/sys_user"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(2);
    let error = client
        .query_table("sys_user", TableQuery::recent(5))
        .await
        .expect_err("every attempt fails");

    assert_eq!(error.status(), Some(500));
}

#[tokio::test]
async fn query_table_does_not_retry_client_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/sys_user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "User Not Authenticated", "detail": "Required to provide Auth information"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client
        .ping()
        .await
        .expect_err("401 should fail");

    assert_eq!(error.status(), Some(401));
}

#[tokio::test]
async fn ping_queries_a_single_user() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/sys_user"))
        .and(query_param("sysparm_limit", "1"))
        .and(query_param("sysparm_fields", "sys_id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"sys_id": "6816f79c"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).ping().await.expect("ping should succeed");
}

#[tokio::test]
async fn unreachable_instance_is_a_connection_error() {
    let config = ServiceNowConfig {
        instance: "http://127.0.0.1:1".to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        ..ServiceNowConfig::default()
    };
    let client = ServiceNowClient::new(&config)
        .expect("client should build")
        .with_retry_attempts(1)
        .with_timeout(Duration::from_secs(5));

    let error = client
        .create_record("incident", json!({}))
        .await
        .expect_err("nothing listens on port 1");

    assert!(matches!(error, ServiceNowError::Connection(_)));
    assert!(
        error
            .to_string()
            .starts_with("Could not connect to ServiceNow: Request Error:")
    );
}

#[tokio::test]
async fn invalid_table_never_reaches_the_network() {
    let server = MockServer::start().await;
    let client = client_for(&server);

    let error = client
        .query_table("sys_user?x=1", TableQuery::recent(1))
        .await
        .expect_err("table name is invalid");

    assert!(matches!(error, ServiceNowError::InvalidTable(_)));
    assert!(
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .is_empty()
    );
}

#[tokio::test]
async fn record_producer_links_sets_and_variables() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/sc_cat_item_producer"))
        .and(body_partial_json(json!({
            "name": "New hire",
            "table_name": "incident",
            "sys_class_name": "sc_cat_item_producer"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"sys_id": "prod1", "name": "New hire"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/io_set_item"))
        .and(body_partial_json(json!({"sc_cat_item": "prod1", "variable_set": "set1"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"sys_id": "link1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/item_option_new"))
        .and(body_partial_json(json!({"cat_item": "prod1", "name": "start_date", "type": "5"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"sys_id": "var1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/item_option_new"))
        .and(body_partial_json(json!({"cat_item": "prod1", "name": "variable_1"})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Invalid insert", "detail": "bad type"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request: RecordProducerRequest = serde_json::from_value(json!({
        "name": "New hire",
        "table_name": "incident",
        "variable_set_ids": ["set1"],
        "variables": [
            {"name": "start_date", "label": "Start date", "type": "date"},
            {"label": "Unnamed"}
        ]
    }))
    .expect("request should deserialize");

    let outcome = create_record_producer(&client_for(&server), &request)
        .await
        .expect("producer should be created");

    assert_eq!(outcome.sys_id, "prod1");
    assert_eq!(
        outcome.variable_set_messages,
        vec!["Added variable set (ID: set1)".to_string()]
    );
    assert_eq!(
        outcome.variable_messages,
        vec![
            "Added variable 'start_date'".to_string(),
            "Error adding variable 'variable_1': ServiceNow API Error: Invalid insert - bad type"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn variable_set_without_sys_id_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/io_set"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let request = VariableSetRequest {
        name: "Contact details".to_string(),
        description: None,
        variables: None,
    };

    let error = create_variable_set(&client_for(&server), &request)
        .await
        .expect_err("missing sys_id should fail");

    assert_eq!(error.to_string(), "No sys_id returned from ServiceNow.");
}

#[tokio::test]
async fn variable_set_reports_unconfirmed_variables() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/io_set"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": {"sys_id": "set9"}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/io_set_variable"))
        .and(body_partial_json(json!({"variable_set": "set9", "order": 100})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let request: VariableSetRequest = serde_json::from_value(json!({
        "name": "Contact details",
        "variables": [{"name": "phone"}]
    }))
    .expect("request should deserialize");

    let outcome = create_variable_set(&client_for(&server), &request)
        .await
        .expect("variable set should be created");

    assert_eq!(outcome.name, "Contact details");
    assert_eq!(
        outcome.summary("Variable Set"),
        "Successfully created Variable Set 'Contact details' (Sys ID: set9).\nVariables: Failed to add variable 'phone'"
    );
}
