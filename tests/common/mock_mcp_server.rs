// tests/common/mock_mcp_server.rs - Mock backend MCP servers for testing
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use chimera::mcp::{BackendSession, Connector, ListChangedNotifier, McpResult, RmcpSession};
use parking_lot::{Mutex, RwLock};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    service::{NotificationContext, Peer, RequestContext},
    tool, tool_handler, tool_router,
    transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    },
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};
use tokio::net::TcpListener;

/// Echo backend with one tool, one resource and one prompt
#[derive(Clone)]
pub struct EchoServer {
    tool_router: ToolRouter<EchoServer>,
}

#[tool_router]
impl EchoServer {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Echo the message back")]
    fn echo(
        &self,
        Parameters(params): Parameters<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult, McpError> {
        let message = params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(format!(
            "echo: {}",
            message
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for EchoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_prompts()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("Echo server for testing".to_string()),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(vec![RawResource::new(
            "memo://greeting",
            "greeting",
        )
        .no_annotation()]))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        if request.uri != "memo://greeting" {
            return Err(McpError::resource_not_found(
                format!("no resource {}", request.uri),
                None,
            ));
        }
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text("hello there", request.uri)],
        })
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult::with_all_items(vec![Prompt::new(
            "greet",
            Some("Greet someone"),
            None,
        )]))
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        let who = request
            .arguments
            .as_ref()
            .and_then(|args| args.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("world")
            .to_string();
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage::new_text(
                PromptMessageRole::User,
                format!("Say hello to {}", who),
            )],
        })
    }
}

/// Backend whose tool list can change at runtime.
///
/// Tools are served two per page so listing goes through pagination.
#[derive(Clone, Default)]
pub struct MutableServer {
    tools: Arc<RwLock<Vec<String>>>,
    peers: Arc<Mutex<Vec<Peer<RoleServer>>>>,
}

const PAGE_SIZE: usize = 2;

impl MutableServer {
    pub fn with_tools(names: &[&str]) -> Self {
        let server = Self::default();
        *server.tools.write() = names.iter().map(|n| n.to_string()).collect();
        server
    }

    /// Replace the tool list without notifying anyone.
    pub fn replace_tools_silently(&self, names: &[&str]) {
        *self.tools.write() = names.iter().map(|n| n.to_string()).collect();
    }

    /// Replace the tool list and tell every connected client.
    pub async fn set_tools(&self, names: &[&str]) {
        *self.tools.write() = names.iter().map(|n| n.to_string()).collect();
        let peers = self.peers.lock().clone();
        for peer in peers {
            let _ = peer.notify_tool_list_changed().await;
        }
    }
}

impl ServerHandler for MutableServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: None,
        }
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        self.peers.lock().push(context.peer);
    }

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let start = request
            .and_then(|r| r.cursor)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let tools = self.tools.read().clone();
        let page: Vec<Tool> = tools
            .iter()
            .skip(start)
            .take(PAGE_SIZE)
            .map(|name| {
                Tool::new(
                    name.clone(),
                    format!("mutable tool {}", name),
                    Arc::new(JsonObject::new()),
                )
            })
            .collect();
        let next = start + PAGE_SIZE;
        Ok(ListToolsResult {
            tools: page,
            next_cursor: (next < tools.len()).then(|| next.to_string()),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if !self.tools.read().iter().any(|t| *t == request.name) {
            return Err(McpError::invalid_params(
                format!("unknown tool {}", request.name),
                None,
            ));
        }
        Ok(CallToolResult::success(vec![Content::text(format!(
            "called {}",
            request.name
        ))]))
    }
}

/// Connector serving a fresh in-process backend over a duplex pipe per
/// connection.
pub struct InProcessConnector<S> {
    make: Arc<dyn Fn() -> S + Send + Sync>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl<S> InProcessConnector<S> {
    pub fn new(make: impl Fn() -> S + Send + Sync + 'static) -> Self {
        Self {
            make: Arc::new(make),
            connects: Arc::new(AtomicUsize::new(0)),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Backend-side sessions that have ended.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S> Connector for InProcessConnector<S>
where
    S: ServerHandler + Send + Sync + 'static,
{
    async fn connect(
        &self,
        backend: &str,
        notifier: ListChangedNotifier,
    ) -> McpResult<Arc<dyn BackendSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);

        let server = (self.make)();
        let disconnects = Arc::clone(&self.disconnects);
        tokio::spawn(async move {
            if let Ok(running) = server.serve(tokio::io::split(server_io)).await {
                let _ = running.waiting().await;
            }
            disconnects.fetch_add(1, Ordering::SeqCst);
        });

        let session = RmcpSession::serve(backend, tokio::io::split(client_io), notifier).await?;
        Ok(Arc::new(session))
    }
}

/// Echo backend reachable over streamable HTTP
pub struct MockMCPServer {
    pub port: u16,
    pub server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockMCPServer {
    /// Start a mock MCP server on an available port
    pub async fn start() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let service = StreamableHttpService::new(
            || Ok(EchoServer::new()),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        let app = axum::Router::new().nest_service("/mcp", service);

        let server_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        // Give the server a moment to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Ok(MockMCPServer {
            port,
            server_handle: Some(server_handle),
        })
    }

    /// Get the full URL for this mock server
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/mcp", self.port)
    }
}

impl Drop for MockMCPServer {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}
