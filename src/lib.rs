use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceNowMcpError>;

#[derive(Error, Debug)]
pub enum ServiceNowMcpError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("ServiceNow error: {0}")]
    ServiceNow(#[from] servicenow::ServiceNowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod mcp;
pub mod servicenow;
