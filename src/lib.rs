pub mod config;
pub mod mcp;
pub mod observability;
pub mod server;
