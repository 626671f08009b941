//! ServiceNow Table API client
//!
//! Thin blocking client over `ureq` with basic authentication. Each blocking
//! call has an async counterpart that runs it on tokio's blocking pool so MCP
//! tool handlers can await it.

pub mod catalog;
pub mod records;

#[cfg(test)]
mod tests;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::{ConfigError, ServiceNowConfig};

pub const TABLE_API_PATH: &str = "api/now/table/";

const JSON_CONTENT_TYPE: &str = "application/json";
const USER_AGENT: &str = concat!("servicenow-mcp/", env!("CARGO_PKG_VERSION"));
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServiceNowError {
    #[error("ServiceNow API Error: {message} - {detail}")]
    Api {
        status: u16,
        message: String,
        detail: String,
    },

    #[error("HTTP Error: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Could not connect to ServiceNow: Request Error: {0}")]
    Connection(String),

    #[error("Unexpected response from ServiceNow: {0}")]
    Decode(String),

    #[error("Invalid table name: '{0}'")]
    InvalidTable(String),

    #[error("ServiceNow request task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceNowError {
    /// Status code of the failed response, if there was one
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server errors, throttling and transport failures are worth another try
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            _ => self
                .status()
                .is_some_and(|status| status >= 500 || status == 429),
        }
    }
}

/// Query string options for reading a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    pub limit: u32,
    /// Ask ServiceNow to resolve reference and choice fields to display values
    pub display_value: bool,
    /// Encoded query, e.g. `active=true^ORDERBYDESCsys_created_on`
    pub query: Option<String>,
    pub fields: Vec<String>,
}

impl TableQuery {
    #[inline]
    pub fn recent(limit: u32) -> Self {
        Self {
            limit,
            display_value: true,
            query: None,
            fields: Vec::new(),
        }
    }

    fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("sysparm_limit", &self.limit.to_string());
        pairs.append_pair(
            "sysparm_display_value",
            if self.display_value { "true" } else { "false" },
        );
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            pairs.append_pair("sysparm_query", query);
        }
        if !self.fields.is_empty() {
            pairs.append_pair("sysparm_fields", &self.fields.join(","));
        }
    }
}

#[derive(Clone)]
pub struct ServiceNowClient {
    base_url: Url,
    authorization: String,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl fmt::Debug for ServiceNowClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceNowClient")
            .field("base_url", &self.base_url.as_str())
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

impl ServiceNowClient {
    #[inline]
    pub fn new(config: &ServiceNowConfig) -> Result<Self, ServiceNowError> {
        let base_url = config.instance_url()?;

        let credentials = format!("{}:{}", config.username, config.password);
        let authorization = format!("Basic {}", STANDARD.encode(credentials));

        Ok(Self {
            base_url,
            authorization,
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay for the exponential backoff between retries
    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Insert a record with `POST api/now/table/{table}`.
    ///
    /// Inserts are not idempotent, so they are attempted exactly once.
    #[inline]
    pub fn create_record_blocking(
        &self,
        table: &str,
        payload: &Value,
    ) -> Result<Value, ServiceNowError> {
        let url = self.table_url(table)?;
        let body = serde_json::to_string(payload)
            .map_err(|e| ServiceNowError::Decode(format!("unserializable payload: {}", e)))?;

        debug!("Making POST request to {} with payload: {}", url, body);

        let outcome = self
            .agent
            .post(url.as_str())
            .header("Authorization", &self.authorization)
            .header("Accept", JSON_CONTENT_TYPE)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .send(&body);

        let (status, text) = read_response(outcome)?;
        interpret_response(status, &text)
    }

    /// Read records with `GET api/now/table/{table}`, retrying transient failures
    #[inline]
    pub fn query_table_blocking(
        &self,
        table: &str,
        query: &TableQuery,
    ) -> Result<Vec<Value>, ServiceNowError> {
        let mut url = self.table_url(table)?;
        query.apply(&mut url);

        let result = self.with_retry(|| {
            debug!("Making GET request to {}", url);
            let outcome = self
                .agent
                .get(url.as_str())
                .header("Authorization", &self.authorization)
                .header("Accept", JSON_CONTENT_TYPE)
                .call();

            let (status, text) = read_response(outcome)?;
            interpret_response(status, &text)
        })?;

        match result {
            Value::Array(records) => Ok(records),
            Value::Object(map) if map.is_empty() => Ok(Vec::new()),
            other => Err(ServiceNowError::Decode(format!(
                "expected a list of records, got {}",
                other
            ))),
        }
    }

    /// Check the instance is reachable and the credentials are accepted
    #[inline]
    pub fn ping_blocking(&self) -> Result<(), ServiceNowError> {
        let query = TableQuery {
            limit: 1,
            display_value: false,
            query: None,
            fields: vec!["sys_id".to_string()],
        };
        self.query_table_blocking("sys_user", &query)?;
        debug!("ServiceNow ping to {} succeeded", self.base_url);
        Ok(())
    }

    #[inline]
    pub async fn create_record(&self, table: &str, payload: Value) -> Result<Value, ServiceNowError> {
        let client = self.clone();
        let table = table.to_string();
        run_blocking(move || client.create_record_blocking(&table, &payload)).await
    }

    #[inline]
    pub async fn query_table(
        &self,
        table: &str,
        query: TableQuery,
    ) -> Result<Vec<Value>, ServiceNowError> {
        let client = self.clone();
        let table = table.to_string();
        run_blocking(move || client.query_table_blocking(&table, &query)).await
    }

    #[inline]
    pub async fn ping(&self) -> Result<(), ServiceNowError> {
        let client = self.clone();
        run_blocking(move || client.ping_blocking()).await
    }

    fn table_url(&self, table: &str) -> Result<Url, ServiceNowError> {
        validate_table_name(table)?;
        self.base_url
            .join(&format!("{}{}", TABLE_API_PATH, table))
            .map_err(|e| ServiceNowError::Decode(format!("could not build table URL: {}", e)))
    }

    fn with_retry<T, F>(&self, mut request_fn: F) -> Result<T, ServiceNowError>
    where
        F: FnMut() -> Result<T, ServiceNowError>,
    {
        let mut attempt = 1;
        loop {
            match request_fn() {
                Ok(value) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.retry_attempts => {
                    let delay = self.retry_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                    warn!(
                        "ServiceNow request failed ({}), attempt {}/{}; retrying in {:?}",
                        e, attempt, self.retry_attempts, delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!("All retry attempts failed for request to {}", self.base_url);
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    // Error statuses are returned as responses so the ServiceNow error body can be read.
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .user_agent(USER_AGENT)
        .build()
        .into()
}

async fn run_blocking<T, F>(task: F) -> Result<T, ServiceNowError>
where
    F: FnOnce() -> Result<T, ServiceNowError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ServiceNowError::Task(e.to_string()))?
}

/// Table names are plain identifiers such as `incident` or `sys_script_client`
#[inline]
pub fn validate_table_name(table: &str) -> Result<(), ServiceNowError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(ServiceNowError::InvalidTable(table.to_string()))
    }
}

fn read_response(
    outcome: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
) -> Result<(u16, String), ServiceNowError> {
    match outcome {
        Ok(mut response) => {
            let status = response.status().as_u16();
            debug!("ServiceNow API response status: {}", status);
            let text = response
                .body_mut()
                .read_to_string()
                .map_err(|e| ServiceNowError::Connection(e.to_string()))?;
            Ok((status, text))
        }
        Err(e) => {
            error!("Request to ServiceNow failed: {}", e);
            Err(ServiceNowError::Connection(e.to_string()))
        }
    }
}

/// Turn a Table API response into the record payload or a typed error.
///
/// Successful responses yield the body's `result` member; `204 No Content`
/// and result-less `201 Created` responses yield a small status object.
/// Any other 2xx body must be JSON.
#[inline]
pub fn interpret_response(status: u16, body: &str) -> Result<Value, ServiceNowError> {
    if !(200..300).contains(&status) {
        let error = api_error(status, body);
        error!("{}", error);
        return Err(error);
    }

    if status == 204 {
        return Ok(json!({
            "status": "success",
            "message": "Operation successful (No Content)"
        }));
    }

    if body.trim().is_empty() {
        return Err(ServiceNowError::Decode(format!(
            "empty body with status {}",
            status
        )));
    }
    let parsed: Value =
        serde_json::from_str(body).map_err(|e| ServiceNowError::Decode(e.to_string()))?;

    if let Value::Object(mut map) = parsed {
        if let Some(result) = map.remove("result") {
            return Ok(result);
        }
    }

    if status == 201 {
        Ok(json!({"status": "success", "message": "Record created"}))
    } else {
        Ok(json!({}))
    }
}

fn api_error(status: u16, body: &str) -> ServiceNowError {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return ServiceNowError::Http {
            status,
            body: body.to_string(),
        };
    };

    // Only an object body whose `error` member, if any, is an object carries details
    let empty = Map::new();
    let details = match parsed.as_object().map(|object| object.get("error")) {
        Some(None) => &empty,
        Some(Some(Value::Object(details))) => details,
        _ => {
            return ServiceNowError::Http {
                status,
                body: body.to_string(),
            };
        }
    };
    let message = details
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown ServiceNow Error")
        .to_string();
    let detail = details
        .get("detail")
        .and_then(Value::as_str)
        .map_or_else(|| body.to_string(), str::to_string);

    ServiceNowError::Api {
        status,
        message,
        detail,
    }
}
