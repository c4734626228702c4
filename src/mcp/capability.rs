//! Capability kinds handled by the aggregate.
//!
//! Tools, resources and prompts go through one generic sync and routing path;
//! [`Capability`] is the per-kind glue: how the kind is identified, listed,
//! invoked on a backend and where it lives in the [`CapabilityTable`].

use std::{borrow::Cow, fmt, sync::Arc};

use dashmap::DashMap;
use futures::{future::BoxFuture, stream::BoxStream};
use rmcp::model::{
    CallToolResult, GetPromptResult, JsonObject, Prompt, ReadResourceResult, Resource, Tool,
};

use crate::mcp::{
    error::McpResult,
    inventory::{CapabilityTable, Registered},
    session::BackendSession,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Tool,
        CapabilityKind::Resource,
        CapabilityKind::Prompt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tools",
            CapabilityKind::Resource => "resources",
            CapabilityKind::Prompt => "prompts",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Capability: Clone + Send + Sync + 'static {
    const KIND: CapabilityKind;

    /// Caller arguments forwarded to the backend.
    type Args: Send + 'static;
    /// Backend result returned to the caller.
    type Output: Send + 'static;

    /// Name or URI as the entry currently carries it.
    fn identifier(&self) -> &str;

    fn set_identifier(&mut self, identifier: String);

    fn list(session: &dyn BackendSession) -> BoxStream<'static, McpResult<Self>>;

    fn invoke(
        session: Arc<dyn BackendSession>,
        original: String,
        args: Self::Args,
    ) -> BoxFuture<'static, McpResult<Self::Output>>;

    fn slot(table: &CapabilityTable) -> &DashMap<String, Registered<Self>>;
}

impl Capability for Tool {
    const KIND: CapabilityKind = CapabilityKind::Tool;

    type Args = Option<JsonObject>;
    type Output = CallToolResult;

    fn identifier(&self) -> &str {
        &self.name
    }

    fn set_identifier(&mut self, identifier: String) {
        self.name = Cow::Owned(identifier);
    }

    fn list(session: &dyn BackendSession) -> BoxStream<'static, McpResult<Self>> {
        session.list_tools()
    }

    fn invoke(
        session: Arc<dyn BackendSession>,
        original: String,
        args: Self::Args,
    ) -> BoxFuture<'static, McpResult<Self::Output>> {
        Box::pin(async move { session.call_tool(&original, args).await })
    }

    fn slot(table: &CapabilityTable) -> &DashMap<String, Registered<Self>> {
        &table.tools
    }
}

impl Capability for Resource {
    const KIND: CapabilityKind = CapabilityKind::Resource;

    type Args = ();
    type Output = ReadResourceResult;

    fn identifier(&self) -> &str {
        &self.raw.uri
    }

    fn set_identifier(&mut self, identifier: String) {
        self.raw.uri = identifier;
    }

    fn list(session: &dyn BackendSession) -> BoxStream<'static, McpResult<Self>> {
        session.list_resources()
    }

    fn invoke(
        session: Arc<dyn BackendSession>,
        original: String,
        _args: Self::Args,
    ) -> BoxFuture<'static, McpResult<Self::Output>> {
        Box::pin(async move { session.read_resource(&original).await })
    }

    fn slot(table: &CapabilityTable) -> &DashMap<String, Registered<Self>> {
        &table.resources
    }
}

impl Capability for Prompt {
    const KIND: CapabilityKind = CapabilityKind::Prompt;

    type Args = Option<JsonObject>;
    type Output = GetPromptResult;

    fn identifier(&self) -> &str {
        &self.name
    }

    fn set_identifier(&mut self, identifier: String) {
        self.name = identifier;
    }

    fn list(session: &dyn BackendSession) -> BoxStream<'static, McpResult<Self>> {
        session.list_prompts()
    }

    fn invoke(
        session: Arc<dyn BackendSession>,
        original: String,
        args: Self::Args,
    ) -> BoxFuture<'static, McpResult<Self::Output>> {
        Box::pin(async move { session.get_prompt(&original, args).await })
    }

    fn slot(table: &CapabilityTable) -> &DashMap<String, Registered<Self>> {
        &table.prompts
    }
}
