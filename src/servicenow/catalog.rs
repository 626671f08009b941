//! Service catalog composition: record producers and variable sets.
//!
//! Both are created in several Table API calls. The parent record is inserted
//! first; variable sets and variables are then attached one at a time and
//! each attachment reports its own outcome without aborting the rest.

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::records::{
    CATALOG_VARIABLE_TABLE, RECORD_PRODUCER_TABLE, RecordProducerRequest, VARIABLE_SET_LINK_TABLE,
    VARIABLE_SET_TABLE, VARIABLE_SET_VARIABLE_TABLE, VariableDefinition, VariableSetRequest,
    field_text, has_sys_id, variable_set_link,
};
use super::{ServiceNowClient, ServiceNowError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    ServiceNow(#[from] ServiceNowError),

    #[error("No sys_id returned from ServiceNow.")]
    MissingSysId,
}

/// Result of creating a catalog record and its attachments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogOutcome {
    pub name: String,
    pub sys_id: String,
    pub variable_set_messages: Vec<String>,
    pub variable_messages: Vec<String>,
}

impl CatalogOutcome {
    /// `Successfully created {kind} '{name}' (Sys ID: {id}).` plus attachment details
    #[inline]
    pub fn summary(&self, kind: &str) -> String {
        let mut message = format!(
            "Successfully created {} '{}' (Sys ID: {}).",
            kind, self.name, self.sys_id
        );

        if !self.variable_set_messages.is_empty() {
            message.push_str("\nVariable Sets: ");
            message.push_str(&self.variable_set_messages.join("; "));
        }

        if !self.variable_messages.is_empty() {
            message.push_str("\nVariables: ");
            message.push_str(&self.variable_messages.join("; "));
        } else if self.variable_set_messages.is_empty() {
            message.push_str(" No variables were added.");
        }

        message
    }
}

/// Create a record producer, then link its variable sets and add its variables
#[inline]
pub async fn create_record_producer(
    client: &ServiceNowClient,
    request: &RecordProducerRequest,
) -> Result<CatalogOutcome, CatalogError> {
    let created = client
        .create_record(RECORD_PRODUCER_TABLE, request.payload())
        .await?;
    let mut outcome = parent_outcome(&created, &request.name)?;
    info!(
        "Created record producer '{}' ({})",
        outcome.name, outcome.sys_id
    );

    for set_id in request.variable_set_ids.iter().flatten() {
        let link = variable_set_link(&outcome.sys_id, set_id);
        let message = match client.create_record(VARIABLE_SET_LINK_TABLE, link).await {
            Ok(result) if has_sys_id(&result) => format!("Added variable set (ID: {})", set_id),
            Ok(_) => format!("Failed to add variable set (ID: {})", set_id),
            Err(e) => {
                warn!("Linking variable set {} failed: {}", set_id, e);
                format!("Error adding variable set (ID: {}): {}", set_id, e)
            }
        };
        outcome.variable_set_messages.push(message);
    }

    outcome.variable_messages = add_variables(
        client,
        CATALOG_VARIABLE_TABLE,
        "cat_item",
        &outcome.sys_id,
        request.variables.as_deref().unwrap_or_default(),
    )
    .await;

    Ok(outcome)
}

/// Create a variable set and add its variables
#[inline]
pub async fn create_variable_set(
    client: &ServiceNowClient,
    request: &VariableSetRequest,
) -> Result<CatalogOutcome, CatalogError> {
    let created = client
        .create_record(VARIABLE_SET_TABLE, request.payload())
        .await?;
    let mut outcome = parent_outcome(&created, &request.name)?;
    info!("Created variable set '{}' ({})", outcome.name, outcome.sys_id);

    outcome.variable_messages = add_variables(
        client,
        VARIABLE_SET_VARIABLE_TABLE,
        "variable_set",
        &outcome.sys_id,
        request.variables.as_deref().unwrap_or_default(),
    )
    .await;

    Ok(outcome)
}

fn parent_outcome(created: &Value, requested_name: &str) -> Result<CatalogOutcome, CatalogError> {
    let sys_id = field_text(created, "sys_id")
        .filter(|id| !id.is_empty())
        .ok_or(CatalogError::MissingSysId)?;
    let name = field_text(created, "name").unwrap_or_else(|| requested_name.to_string());

    Ok(CatalogOutcome {
        name,
        sys_id,
        ..CatalogOutcome::default()
    })
}

async fn add_variables(
    client: &ServiceNowClient,
    table: &str,
    parent_field: &str,
    parent_sys_id: &str,
    variables: &[VariableDefinition],
) -> Vec<String> {
    let mut messages = Vec::with_capacity(variables.len());

    for (index, variable) in variables.iter().enumerate() {
        let name = variable.display_name(index);
        let payload = variable.payload(index, parent_field, parent_sys_id);
        let message = match client.create_record(table, payload).await {
            Ok(result) if has_sys_id(&result) => format!("Added variable '{}'", name),
            Ok(_) => format!("Failed to add variable '{}'", name),
            Err(e) => {
                warn!("Adding variable '{}' to {} failed: {}", name, table, e);
                format!("Error adding variable '{}': {}", name, e)
            }
        };
        messages.push(message);
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_without_attachments() {
        let outcome = CatalogOutcome {
            name: "Laptop request".to_string(),
            sys_id: "abc".to_string(),
            ..Default::default()
        };

        assert_eq!(
            outcome.summary("Record Producer"),
            "Successfully created Record Producer 'Laptop request' (Sys ID: abc). No variables were added."
        );
    }

    #[test]
    fn summary_lists_attachments() {
        let outcome = CatalogOutcome {
            name: "Onboarding".to_string(),
            sys_id: "p1".to_string(),
            variable_set_messages: vec!["Added variable set (ID: s1)".to_string()],
            variable_messages: vec![
                "Added variable 'first_name'".to_string(),
                "Failed to add variable 'variable_1'".to_string(),
            ],
        };

        assert_eq!(
            outcome.summary("Record Producer"),
            "Successfully created Record Producer 'Onboarding' (Sys ID: p1).\n\
             Variable Sets: Added variable set (ID: s1)\n\
             Variables: Added variable 'first_name'; Failed to add variable 'variable_1'"
        );
    }

    #[test]
    fn summary_with_only_variable_sets() {
        let outcome = CatalogOutcome {
            name: "Access".to_string(),
            sys_id: "p2".to_string(),
            variable_set_messages: vec!["Failed to add variable set (ID: s9)".to_string()],
            variable_messages: Vec::new(),
        };

        assert!(outcome.summary("Record Producer").ends_with(
            "\nVariable Sets: Failed to add variable set (ID: s9)"
        ));
    }

    #[test]
    fn parent_outcome_requires_sys_id() {
        let missing = parent_outcome(&json!({"name": "x"}), "x");
        assert!(matches!(missing, Err(CatalogError::MissingSysId)));
        assert_eq!(
            CatalogError::MissingSysId.to_string(),
            "No sys_id returned from ServiceNow."
        );

        let outcome = parent_outcome(&json!({"sys_id": "42"}), "Requested")
            .expect("sys_id is present");
        assert_eq!(outcome.name, "Requested");
        assert_eq!(outcome.sys_id, "42");
    }
}
