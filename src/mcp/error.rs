//! MCP error types.
//!
//! Defines error variants for backend connection, enumeration and routed calls,
//! plus the mapping onto protocol errors returned to the downstream client.

use rmcp::{model::ErrorData, service::ServiceError};
use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Proxy is closed")]
    Closed,

    #[error(transparent)]
    Backend(#[from] ServiceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<McpError> for ErrorData {
    fn from(err: McpError) -> Self {
        match err {
            // Backend protocol errors travel back to the caller untouched.
            McpError::Backend(ServiceError::McpError(data)) => data,
            McpError::ToolNotFound(name) => {
                ErrorData::invalid_params(format!("tool not found: {}", name), None)
            }
            McpError::PromptNotFound(name) => {
                ErrorData::invalid_params(format!("prompt not found: {}", name), None)
            }
            McpError::ResourceNotFound(uri) => {
                ErrorData::resource_not_found(format!("resource not found: {}", uri), None)
            }
            other => ErrorData::internal_error(other.to_string(), None),
        }
    }
}
