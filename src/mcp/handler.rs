//! Aggregate MCP server.
//!
//! Serves a [`ProxyInstance`] to one downstream client over any rmcp
//! transport. List requests are answered from the capability table; calls are
//! routed to the owning backend.

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, ErrorData, GetPromptRequestParam, GetPromptResult,
        Implementation, InitializeRequestParam, InitializeResult, ListPromptsResult,
        ListResourcesResult, ListToolsResult, PaginatedRequestParam, PromptsCapability,
        ProtocolVersion, ReadResourceRequestParam, ReadResourceResult, ResourcesCapability,
        ServerCapabilities, ServerInfo, ToolsCapability,
    },
    service::{NotificationContext, RequestContext},
    RoleServer, ServerHandler,
};
use tracing::debug;

use crate::mcp::proxy::ProxyInstance;

impl ServerHandler for ProxyInstance {
    fn get_info(&self) -> ServerInfo {
        let backends = self.backends();
        let instructions = if backends.is_empty() {
            "Aggregating MCP proxy with no connected backends.".to_string()
        } else {
            format!(
                "Aggregating MCP proxy. Tools, prompts and resources are prefixed with their backend name: {}.",
                backends.join(", ")
            )
        };

        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
                resources: Some(ResourcesCapability {
                    subscribe: None,
                    list_changed: Some(true),
                }),
                prompts: Some(PromptsCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "chimera".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(instructions),
        }
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, ErrorData> {
        if context.peer.peer_info().is_none() {
            context.peer.set_peer_info(request);
        }
        // Answer only once every backend has had its initial sync.
        self.ready().await?;
        Ok(self.get_info())
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        debug!("Downstream client initialized");
        self.table().attach_peer(context.peer);
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(ProxyInstance::list_tools(
            self,
        )))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(ProxyInstance::call_tool(self, &request.name, request.arguments).await?)
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult::with_all_items(
            ProxyInstance::list_resources(self),
        ))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        Ok(ProxyInstance::read_resource(self, &request.uri).await?)
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, ErrorData> {
        Ok(ListPromptsResult::with_all_items(
            ProxyInstance::list_prompts(self),
        ))
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, ErrorData> {
        Ok(ProxyInstance::get_prompt(self, &request.name, request.arguments).await?)
    }
}
