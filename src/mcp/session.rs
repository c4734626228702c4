//! Live protocol sessions to backend MCP servers.
//!
//! [`BackendSession`] is the seam between the aggregation engine and a
//! connected backend. The rmcp-backed implementation forwards list-changed
//! notifications into a [`ListChangedNotifier`] so the owning proxy can resync.

use std::{borrow::Cow, collections::HashSet, future::Future, sync::Arc};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, ClientInfo, GetPromptRequestParam,
        GetPromptResult, Implementation, JsonObject, PaginatedRequestParam, Prompt,
        ReadResourceRequestParam, ReadResourceResult, Resource, Tool,
    },
    service::{NotificationContext, Peer, RunningService},
    transport::IntoTransport,
    ClientHandler, RoleClient, ServiceExt,
};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::mcp::{
    capability::CapabilityKind,
    error::{McpError, McpResult},
};

/// A connected backend session.
///
/// Enumerations are lazy, finite and may fail on any page.
#[async_trait]
pub trait BackendSession: Send + Sync {
    fn list_tools(&self) -> BoxStream<'static, McpResult<Tool>>;

    fn list_resources(&self) -> BoxStream<'static, McpResult<Resource>>;

    fn list_prompts(&self) -> BoxStream<'static, McpResult<Prompt>>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult>;

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<GetPromptResult>;

    async fn close(&self) -> McpResult<()>;
}

/// Wakes the per-kind resync workers of one backend.
///
/// Notifications coalesce: any number of signals delivered while a resync is
/// running result in exactly one further pass.
#[derive(Clone, Default)]
pub struct ListChangedNotifier {
    tools: Arc<Notify>,
    resources: Arc<Notify>,
    prompts: Arc<Notify>,
}

impl ListChangedNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self, kind: CapabilityKind) {
        debug!(%kind, "list changed");
        self.signal(kind).notify_one();
    }

    pub(crate) fn signal(&self, kind: CapabilityKind) -> Arc<Notify> {
        match kind {
            CapabilityKind::Tool => Arc::clone(&self.tools),
            CapabilityKind::Resource => Arc::clone(&self.resources),
            CapabilityKind::Prompt => Arc::clone(&self.prompts),
        }
    }
}

/// Client-side handler installed on every backend connection.
#[derive(Clone)]
pub struct ProxyClientHandler {
    backend: String,
    notifier: ListChangedNotifier,
}

impl ProxyClientHandler {
    pub fn new(backend: impl Into<String>, notifier: ListChangedNotifier) -> Self {
        Self {
            backend: backend.into(),
            notifier,
        }
    }
}

impl ClientHandler for ProxyClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            client_info: Implementation {
                name: "chimera".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        debug!(backend = %self.backend, "backend reported tool list change");
        self.notifier.notify(CapabilityKind::Tool);
        std::future::ready(())
    }

    fn on_resource_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        debug!(backend = %self.backend, "backend reported resource list change");
        self.notifier.notify(CapabilityKind::Resource);
        std::future::ready(())
    }

    fn on_prompt_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        debug!(backend = %self.backend, "backend reported prompt list change");
        self.notifier.notify(CapabilityKind::Prompt);
        std::future::ready(())
    }
}

type McpClient = RunningService<RoleClient, ProxyClientHandler>;

/// [`BackendSession`] over an rmcp client connection.
pub struct RmcpSession {
    backend: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<McpClient>>,
}

impl RmcpSession {
    /// Run the MCP handshake over `transport`.
    pub async fn serve<T, E, A>(
        backend: &str,
        transport: T,
        notifier: ListChangedNotifier,
    ) -> McpResult<Self>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let handler = ProxyClientHandler::new(backend, notifier);
        let service = handler.serve(transport).await.map_err(|e| {
            McpError::ConnectionFailed(format!("initialize client for '{}': {}", backend, e))
        })?;
        let peer = service.peer().clone();

        Ok(Self {
            backend: backend.to_string(),
            peer,
            service: Mutex::new(Some(service)),
        })
    }
}

/// Turn a cursor-paginated listing into a lazy stream of items.
///
/// A failed page yields a single error and ends the stream. So does a cursor
/// the backend already handed out, which would otherwise loop forever.
fn paginate<T, F, Fut>(fetch: F) -> BoxStream<'static, McpResult<T>>
where
    T: Send + 'static,
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<(Vec<T>, Option<String>)>> + Send + 'static,
{
    let fetch = Arc::new(fetch);
    // None = exhausted, Some(cursor) = next page to fetch
    let start = (Some(None::<String>), HashSet::<String>::new());
    stream::unfold(start, move |(state, mut seen)| {
        let fetch = Arc::clone(&fetch);
        async move {
            let cursor = state?;
            match fetch(cursor).await {
                Ok((items, next)) => {
                    let page = stream::iter(items.into_iter().map(Ok));
                    match next {
                        Some(next) if !seen.insert(next.clone()) => {
                            let err = McpError::Transport(format!(
                                "backend repeated page cursor '{}'",
                                next
                            ));
                            let page = page.chain(stream::once(async move { Err(err) }));
                            Some((page.boxed(), (None, seen)))
                        }
                        next => Some((page.boxed(), (next.map(Some), seen))),
                    }
                }
                Err(e) => Some((stream::once(async move { Err(e) }).boxed(), (None, seen))),
            }
        }
    })
    .flatten()
    .boxed()
}

#[async_trait]
impl BackendSession for RmcpSession {
    fn list_tools(&self) -> BoxStream<'static, McpResult<Tool>> {
        let peer = self.peer.clone();
        paginate(move |cursor| {
            let peer = peer.clone();
            async move {
                let page = peer.list_tools(Some(PaginatedRequestParam { cursor })).await?;
                Ok((page.tools, page.next_cursor))
            }
        })
    }

    fn list_resources(&self) -> BoxStream<'static, McpResult<Resource>> {
        let peer = self.peer.clone();
        paginate(move |cursor| {
            let peer = peer.clone();
            async move {
                let page = peer
                    .list_resources(Some(PaginatedRequestParam { cursor }))
                    .await?;
                Ok((page.resources, page.next_cursor))
            }
        })
    }

    fn list_prompts(&self) -> BoxStream<'static, McpResult<Prompt>> {
        let peer = self.peer.clone();
        paginate(move |cursor| {
            let peer = peer.clone();
            async move {
                let page = peer
                    .list_prompts(Some(PaginatedRequestParam { cursor }))
                    .await?;
                Ok((page.prompts, page.next_cursor))
            }
        })
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult> {
        let request = CallToolRequestParam {
            name: Cow::Owned(name.to_string()),
            arguments,
        };
        Ok(self.peer.call_tool(request).await?)
    }

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        let request = ReadResourceRequestParam {
            uri: uri.to_string(),
        };
        Ok(self.peer.read_resource(request).await?)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<GetPromptResult> {
        let request = GetPromptRequestParam {
            name: name.to_string(),
            arguments,
        };
        Ok(self.peer.get_prompt(request).await?)
    }

    async fn close(&self) -> McpResult<()> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        debug!(backend = %self.backend, "closing backend session");
        service
            .cancel()
            .await
            .map_err(|e| McpError::Transport(format!("join client task: {}", e)))?;
        Ok(())
    }
}
