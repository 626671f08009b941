//! Table API payloads for the record types the MCP tools create and list.
//!
//! Request structs deserialize straight from tool arguments; `payload()`
//! produces the JSON body ServiceNow expects. ServiceNow takes booleans as
//! the strings `"true"` / `"false"`.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

pub const INCIDENT_TABLE: &str = "incident";
pub const KB_ARTICLE_TABLE: &str = "kb_knowledge";
pub const CLIENT_SCRIPT_TABLE: &str = "sys_script_client";
pub const BUSINESS_RULE_TABLE: &str = "sys_script";
pub const SLA_DEFINITION_TABLE: &str = "contract_sla";
pub const RECORD_PRODUCER_TABLE: &str = "sc_cat_item_producer";
pub const CATALOG_VARIABLE_TABLE: &str = "item_option_new";
pub const VARIABLE_SET_TABLE: &str = "io_set";
pub const VARIABLE_SET_VARIABLE_TABLE: &str = "io_set_variable";
pub const VARIABLE_SET_LINK_TABLE: &str = "io_set_item";
pub const CHANGE_REQUEST_TABLE: &str = "change_request";
pub const USER_TABLE: &str = "sys_user";

/// Catalog variable types and their internal ServiceNow codes
pub const VARIABLE_TYPES: &[(&str, &str)] = &[
    ("string", "2"),
    ("integer", "9"),
    ("boolean", "6"),
    ("reference", "8"),
    ("choice", "3"),
    ("text", "1"),
    ("date", "5"),
    ("datetime", "4"),
    ("currency", "10"),
    ("price", "7"),
];

const DEFAULT_VARIABLE_TYPE_CODE: &str = "2";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("'field_name' is required when script_type is 'onChange'.")]
    MissingFieldName,
}

fn flag(value: bool) -> Value {
    Value::String(value.to_string())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Text of a field as returned with `sysparm_display_value=true`.
///
/// Reference fields come back as `{"display_value": ..., "link": ...}`.
#[inline]
pub fn field_text(record: &Value, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(object) => object
            .get("display_value")
            .and_then(Value::as_str)
            .map(str::to_string),
        other => Some(other.to_string()),
    }
}

/// `field_text` with a fallback for missing fields
#[inline]
pub fn field_or(record: &Value, field: &str, fallback: &str) -> String {
    field_text(record, field).unwrap_or_else(|| fallback.to_string())
}

/// Whether an insert response carries a usable `sys_id`
#[inline]
pub fn has_sys_id(record: &Value) -> bool {
    field_text(record, "sys_id").is_some_and(|id| !id.is_empty())
}

/// Render a duration as a GlideDuration, `1970-01-01 HH:MM:SS` from the epoch.
///
/// Hours are not wrapped at 24, so three days render as `72:00:00`.
#[inline]
pub fn glide_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("1970-01-01 {:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Internal type code for a catalog variable type name; unknown names map to string
#[inline]
pub fn variable_type_code(kind: &str) -> &'static str {
    let kind = kind.to_lowercase();
    VARIABLE_TYPES
        .iter()
        .find(|(name, _)| *name == kind)
        .map_or(DEFAULT_VARIABLE_TYPE_CODE, |(_, code)| code)
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IncidentRequest {
    pub short_description: String,
    #[serde(default)]
    pub description: Option<String>,
    /// User name or sys_id; ServiceNow resolves names itself
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
}

impl IncidentRequest {
    #[inline]
    pub fn payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("short_description".into(), json!(self.short_description));
        payload.insert(
            "description".into(),
            json!(non_empty(self.description.as_ref()).unwrap_or(&self.short_description)),
        );
        payload.insert(
            "urgency".into(),
            json!(non_empty(self.urgency.as_ref()).unwrap_or("3")),
        );
        payload.insert(
            "impact".into(),
            json!(non_empty(self.impact.as_ref()).unwrap_or("3")),
        );
        if let Some(caller_id) = non_empty(self.caller_id.as_ref()) {
            payload.insert("caller_id".into(), json!(caller_id));
        }
        Value::Object(payload)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KbArticleRequest {
    pub short_description: String,
    pub article_body: String,
    #[serde(default)]
    pub kb_knowledge_base: Option<String>,
    #[serde(default)]
    pub workflow_state: Option<String>,
}

impl KbArticleRequest {
    #[inline]
    pub fn payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("short_description".into(), json!(self.short_description));
        payload.insert("text".into(), json!(self.article_body));
        payload.insert(
            "workflow_state".into(),
            json!(non_empty(self.workflow_state.as_ref()).unwrap_or("draft")),
        );
        payload.insert("article_type".into(), json!("text"));
        if let Some(knowledge_base) = non_empty(self.kb_knowledge_base.as_ref()) {
            payload.insert("kb_knowledge_base".into(), json!(knowledge_base));
        }
        Value::Object(payload)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientScriptRequest {
    pub name: String,
    pub table: String,
    pub script: String,
    #[serde(default)]
    pub ui_type: Option<String>,
    #[serde(default)]
    pub script_type: Option<String>,
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl ClientScriptRequest {
    #[inline]
    pub fn script_type(&self) -> &str {
        non_empty(self.script_type.as_ref()).unwrap_or("onChange")
    }

    #[inline]
    pub fn payload(&self) -> Result<Value, RecordError> {
        let field_name = non_empty(self.field_name.as_ref());
        if self.script_type() == "onChange" && field_name.is_none() {
            return Err(RecordError::MissingFieldName);
        }

        let mut payload = Map::new();
        payload.insert("name".into(), json!(self.name));
        payload.insert("table".into(), json!(self.table));
        payload.insert("script".into(), json!(self.script));
        payload.insert(
            "ui_type".into(),
            json!(non_empty(self.ui_type.as_ref()).unwrap_or("all")),
        );
        payload.insert("type".into(), json!(self.script_type()));
        payload.insert("active".into(), flag(self.is_active.unwrap_or(true)));
        if let Some(field_name) = field_name {
            payload.insert("field_name".into(), json!(field_name));
        }
        Ok(Value::Object(payload))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BusinessRuleRequest {
    pub name: String,
    pub table: String,
    pub script: String,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub action_insert: Option<bool>,
    #[serde(default)]
    pub action_update: Option<bool>,
    #[serde(default)]
    pub action_delete: Option<bool>,
    #[serde(default)]
    pub action_query: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl BusinessRuleRequest {
    #[inline]
    pub fn payload(&self) -> Value {
        json!({
            "name": self.name,
            "table": self.table,
            "script": self.script,
            "when": non_empty(self.when.as_ref()).unwrap_or("before"),
            "order": self.order.unwrap_or(100),
            "action_insert": flag(self.action_insert.unwrap_or(true)),
            "action_update": flag(self.action_update.unwrap_or(true)),
            "action_delete": flag(self.action_delete.unwrap_or(false)),
            "action_query": flag(self.action_query.unwrap_or(false)),
            "active": flag(self.is_active.unwrap_or(true)),
            "collection": self.table,
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SlaDefinitionRequest {
    pub name: String,
    pub table: String,
    pub duration_seconds: u64,
    #[serde(default)]
    pub start_condition: Option<String>,
    #[serde(default)]
    pub stop_condition: Option<String>,
    #[serde(default)]
    pub pause_condition: Option<String>,
}

impl SlaDefinitionRequest {
    #[inline]
    pub fn payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("name".into(), json!(self.name));
        payload.insert("target_table".into(), json!(self.table));
        payload.insert(
            "duration".into(),
            json!(glide_duration(self.duration_seconds)),
        );
        payload.insert("duration_type".into(), json!("glide_duration"));
        payload.insert("type".into(), json!("SLA"));
        payload.insert("active".into(), flag(true));

        let conditions = [
            ("start_condition", &self.start_condition),
            ("stop_condition", &self.stop_condition),
            ("pause_condition", &self.pause_condition),
        ];
        for (field, condition) in conditions {
            if let Some(condition) = non_empty(condition.as_ref()) {
                payload.insert(field.into(), json!(condition));
            }
        }
        Value::Object(payload)
    }
}

/// One catalog variable to attach to a record producer or variable set
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct VariableDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub mandatory: Option<bool>,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub reference_table: Option<String>,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl VariableDefinition {
    /// Variable name, `variable_{index}` when none was given
    #[inline]
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("variable_{}", index))
    }

    /// Payload for the variable at `index`, linked to its parent through
    /// `parent_field` (`cat_item` or `variable_set`).
    #[inline]
    pub fn payload(&self, index: usize, parent_field: &str, parent_sys_id: &str) -> Value {
        let kind = self.kind.as_deref().unwrap_or("string");
        let question_text = self
            .label
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("Variable {}", index));

        let mut payload = Map::new();
        payload.insert(parent_field.into(), json!(parent_sys_id));
        payload.insert("name".into(), json!(self.display_name(index)));
        payload.insert("question_text".into(), json!(question_text));
        payload.insert("type".into(), json!(variable_type_code(kind)));
        payload.insert("mandatory".into(), flag(self.mandatory.unwrap_or(false)));
        payload.insert("order".into(), json!((index + 1) * 100));
        payload.insert(
            "help_text".into(),
            json!(self.help_text.as_deref().unwrap_or_default()),
        );
        payload.insert(
            "description".into(),
            json!(self.description.as_deref().unwrap_or_default()),
        );

        match &self.default_value {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => {
                payload.insert("default_value".into(), json!(text));
            }
            Some(other) => {
                payload.insert("default_value".into(), json!(other.to_string()));
            }
        }

        if kind.eq_ignore_ascii_case("reference") {
            if let Some(table) = &self.reference_table {
                payload.insert("reference".into(), json!(table));
            }
        }

        Value::Object(payload)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecordProducerRequest {
    pub name: String,
    /// Table the produced record is inserted into
    pub table_name: String,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub category_sys_id: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub variables: Option<Vec<VariableDefinition>>,
    #[serde(default)]
    pub variable_set_ids: Option<Vec<String>>,
}

impl RecordProducerRequest {
    #[inline]
    pub fn payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("name".into(), json!(self.name));
        payload.insert("table_name".into(), json!(self.table_name));
        payload.insert(
            "short_description".into(),
            json!(non_empty(self.short_description.as_ref()).unwrap_or(&self.name)),
        );
        payload.insert("active".into(), flag(true));
        payload.insert("sys_class_name".into(), json!(RECORD_PRODUCER_TABLE));
        if let Some(category) = non_empty(self.category_sys_id.as_ref()) {
            payload.insert("category".into(), json!(category));
        }
        if let Some(script) = non_empty(self.script.as_ref()) {
            payload.insert("script".into(), json!(script));
        }
        Value::Object(payload)
    }
}

/// Link row attaching a variable set to a catalog item
#[inline]
pub fn variable_set_link(catalog_item_sys_id: &str, variable_set_sys_id: &str) -> Value {
    json!({
        "sc_cat_item": catalog_item_sys_id,
        "variable_set": variable_set_sys_id,
    })
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VariableSetRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: Option<Vec<VariableDefinition>>,
}

impl VariableSetRequest {
    #[inline]
    pub fn payload(&self) -> Value {
        json!({
            "name": self.name,
            "description": non_empty(self.description.as_ref()).unwrap_or(&self.name),
            "active": flag(true),
        })
    }
}

/// The record lists exposed as read-only tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordListing {
    Incidents,
    ChangeRequests,
    Users,
}

impl RecordListing {
    #[inline]
    pub fn table(self) -> &'static str {
        match self {
            Self::Incidents => INCIDENT_TABLE,
            Self::ChangeRequests => CHANGE_REQUEST_TABLE,
            Self::Users => USER_TABLE,
        }
    }

    /// Plural noun used in summaries, e.g. "change requests"
    #[inline]
    pub fn noun(self) -> &'static str {
        match self {
            Self::Incidents => "incidents",
            Self::ChangeRequests => "change requests",
            Self::Users => "users",
        }
    }

    #[inline]
    pub fn format_record(self, record: &Value) -> String {
        match self {
            Self::Incidents => format!(
                "• {}: {} (State: {}, Priority: {})",
                field_or(record, "number", "N/A"),
                field_or(record, "short_description", "No description"),
                field_or(record, "state", "N/A"),
                field_or(record, "priority", "N/A"),
            ),
            Self::ChangeRequests => format!(
                "• {}: {} (State: {}, Risk: {})",
                field_or(record, "number", "N/A"),
                field_or(record, "short_description", "No description"),
                field_or(record, "state", "N/A"),
                field_or(record, "risk", "N/A"),
            ),
            Self::Users => format!(
                "• {}: {} (Email: {}, Active: {})",
                field_or(record, "user_name", "N/A"),
                field_or(record, "name", "No name"),
                field_or(record, "email", "N/A"),
                field_or(record, "active", "N/A"),
            ),
        }
    }

    /// Summary text for a fetched page of records
    #[inline]
    pub fn summarize(self, records: &[Value]) -> String {
        if records.is_empty() {
            return format!("No {} found.", self.noun());
        }

        let lines: Vec<String> = records.iter().map(|r| self.format_record(r)).collect();
        format!(
            "Retrieved {} {}:\n{}",
            records.len(),
            self.noun(),
            lines.join("\n")
        )
    }
}
