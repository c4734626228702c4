//! Downstream serving.
//!
//! Over HTTP every MCP session gets its own proxy instance from the manager.
//! Over stdio a single instance is assembled up front and served until the
//! client disconnects.

use std::sync::Arc;

use axum::{routing::get, Router};
use rmcp::{
    transport::{
        stdio,
        streamable_http_server::{session::local::LocalSessionManager, StreamableHttpService},
    },
    ServiceExt,
};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{error, info};

use crate::mcp::{ConfigProvider, ProxyInstance, ProxyManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeMode {
    Http,
    Stdio,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: ServeMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            mode: ServeMode::Http,
        }
    }
}

/// MCP service creating a fresh proxy instance per session.
///
/// Sessions assemble in the background; `initialize` is answered once the
/// instance is ready. Dropping a session drops its instance, which closes the
/// backend connections it owns.
pub fn mcp_service(
    manager: ProxyManager,
    shutdown: watch::Receiver<bool>,
) -> StreamableHttpService<ProxyInstance, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(manager.spawn_proxy(shutdown.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    )
}

pub fn build_app(manager: ProxyManager, shutdown: watch::Receiver<bool>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest_service("/mcp", mcp_service(manager, shutdown))
}

pub async fn serve_http(
    listener: TcpListener,
    manager: ProxyManager,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = build_app(manager, shutdown.clone());
    let mut stop = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|s| *s).await;
        })
        .await?;
    Ok(())
}

pub async fn serve_stdio(
    manager: ProxyManager,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let proxy = manager.new_proxy(shutdown.clone()).await?;
    info!(backends = ?proxy.backends(), "Serving aggregate on stdio");

    let service = proxy.clone().serve(stdio()).await?;
    let mut stop = shutdown;
    tokio::select! {
        quit = service.waiting() => {
            info!("Stdio session ended: {:?}", quit?);
        }
        _ = stop.wait_for(|s| *s) => {}
    }

    proxy.close().await;
    Ok(())
}

pub async fn startup(config: ServerConfig, provider: Arc<dyn ConfigProvider>) -> anyhow::Result<()> {
    let manager = ProxyManager::new(provider);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_tx.send_replace(true);
    });

    match config.mode {
        ServeMode::Stdio => serve_stdio(manager, shutdown_rx).await,
        ServeMode::Http => {
            let bind_addr = format!("{}:{}", config.host, config.port);
            let listener = TcpListener::bind(&bind_addr).await?;
            info!("Starting server on http://{}/mcp", listener.local_addr()?);
            serve_http(listener, manager, shutdown_rx).await
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
