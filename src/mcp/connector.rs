//! Backend connectors.
//!
//! A [`Connector`] knows how to reach one configured backend and produce a
//! fresh [`BackendSession`] for every call. Sessions are never pooled: each
//! proxy instance owns the connections it opened.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use rmcp::transport::{
    streamable_http_client::StreamableHttpClientTransportConfig, ConfigureCommandExt,
    StreamableHttpClientTransport, TokioChildProcess,
};
use tracing::info;

use crate::mcp::{
    error::{McpError, McpResult},
    session::{BackendSession, ListChangedNotifier, RmcpSession},
};

/// Point-in-time set of configured backends, keyed by backend name.
pub type Backends = Arc<BTreeMap<String, Arc<dyn Connector>>>;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session to the backend.
    ///
    /// List-changed notifications from the backend are delivered to `notifier`.
    async fn connect(
        &self,
        backend: &str,
        notifier: ListChangedNotifier,
    ) -> McpResult<Arc<dyn BackendSession>>;
}

/// Spawns the backend as a child process and speaks MCP over its stdio.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(
        &self,
        backend: &str,
        notifier: ListChangedNotifier,
    ) -> McpResult<Arc<dyn BackendSession>> {
        info!(backend, command = %self.command, "Connecting to stdio MCP server");

        let transport = TokioChildProcess::new(tokio::process::Command::new(&self.command).configure(
            |cmd| {
                cmd.args(&self.args)
                    .envs(self.env.iter())
                    .stderr(std::process::Stdio::inherit());
            },
        ))
        .map_err(|e| McpError::Transport(format!("create stdio transport: {}", e)))?;

        let session = RmcpSession::serve(backend, transport, notifier).await?;
        info!(backend, "Connected to stdio MCP server");
        Ok(Arc::new(session))
    }
}

/// Streamable HTTP backend.
#[derive(Debug, Clone)]
pub struct StreamableConnector {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub token: Option<String>,
}

impl StreamableConnector {
    fn http_client(&self) -> McpResult<reqwest::Client> {
        let headers = build_default_headers(&self.headers, self.token.as_deref())?;
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .map_err(|e| McpError::Transport(format!("build HTTP client: {}", e)))
    }
}

#[async_trait]
impl Connector for StreamableConnector {
    async fn connect(
        &self,
        backend: &str,
        notifier: ListChangedNotifier,
    ) -> McpResult<Arc<dyn BackendSession>> {
        info!(backend, url = %self.url, "Connecting to streamable HTTP MCP server");

        let client = self.http_client()?;
        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(self.url.as_str()),
        );

        let session = RmcpSession::serve(backend, transport, notifier).await?;
        info!(backend, url = %self.url, "Connected to streamable HTTP MCP server");
        Ok(Arc::new(session))
    }
}

/// Validate configured headers and add the bearer token, unless an explicit
/// `Authorization` header was configured.
fn build_default_headers(
    headers: &HashMap<String, String>,
    token: Option<&str>,
) -> McpResult<HeaderMap> {
    let mut header_map = HeaderMap::new();

    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| McpError::Config(format!("Invalid header name: {}", key)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| McpError::Config(format!("Invalid header value for {}", key)))?;
        header_map.insert(name, header_value);
    }

    if let Some(token) = token {
        if !header_map.contains_key(AUTHORIZATION) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| McpError::Config("Invalid bearer token".to_string()))?;
            header_map.insert(AUTHORIZATION, value);
        }
    }

    Ok(header_map)
}
