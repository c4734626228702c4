//! Backend configuration.
//!
//! Loads the set of backend MCP servers from a JSON or YAML file and turns it
//! into connectors, either once or continuously as the file changes.

pub mod provider;
pub mod types;

pub use provider::{FileWatchProvider, StaticProvider};
pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("Unsupported config format for '{path}', expected .json, .yaml or .yml")]
    UnsupportedFormat { path: String },

    #[error("Invalid value for server '{server}' field '{field}': {reason}")]
    InvalidValue {
        server: String,
        field: String,
        reason: String,
    },

    #[error("Failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
