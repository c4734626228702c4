//! Model Context Protocol (MCP) aggregation.
//!
//! Connects to many backend MCP servers, exposes their tools, resources and
//! prompts under backend-prefixed identifiers, and routes calls back to the
//! owning backend. One proxy instance is built per inbound session.

pub mod capability;
pub mod connector;
pub mod error;
pub mod handler;
pub mod inventory;
pub mod manager;
pub mod namespace;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export types used outside this module
pub use capability::{Capability, CapabilityKind};
pub use connector::{Backends, Connector, StdioConnector, StreamableConnector};
pub use error::{McpError, McpResult};
pub use inventory::CapabilityTable;
pub use manager::{ConfigProvider, ProxyManager};
pub use proxy::{ProxyInstance, ProxyState};
pub use registry::{CapabilityRegistry, SyncReport};
pub use session::{BackendSession, ListChangedNotifier, RmcpSession};
