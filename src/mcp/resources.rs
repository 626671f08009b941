//! Read-only MCP resources

use crate::mcp::protocol::{Resource, ResourceContents};
use crate::mcp::server::ResourceHandler;
use crate::servicenow::records::VARIABLE_TYPES;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub const VARIABLE_TYPES_URI: &str = "servicenow://catalog/variable-types";

const JSON_MIME_TYPE: &str = "application/json";

/// Catalog variable type names and the codes ServiceNow stores for them
pub struct VariableTypesResource;

impl VariableTypesResource {
    #[inline]
    pub fn resource_definition() -> Resource {
        Resource {
            uri: VARIABLE_TYPES_URI.to_string(),
            name: "Catalog variable types".to_string(),
            description: Some(
                "Variable type names accepted by create_record_producer and create_variable_set, \
                 with their ServiceNow type codes"
                    .to_string(),
            ),
            mime_type: Some(JSON_MIME_TYPE.to_string()),
        }
    }

    #[inline]
    pub fn contents() -> Result<ResourceContents> {
        let types: Map<String, Value> = VARIABLE_TYPES
            .iter()
            .map(|(name, code)| ((*name).to_string(), Value::String((*code).to_string())))
            .collect();

        Ok(ResourceContents {
            uri: VARIABLE_TYPES_URI.to_string(),
            mime_type: Some(JSON_MIME_TYPE.to_string()),
            text: serde_json::to_string_pretty(&types)?,
        })
    }
}

#[async_trait]
impl ResourceHandler for VariableTypesResource {
    #[inline]
    async fn handle(&self, _uri: &str) -> Result<Vec<ResourceContents>> {
        Ok(vec![Self::contents()?])
    }
}
