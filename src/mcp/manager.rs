//! Per-session proxy factory.
//!
//! The manager holds no connections of its own. Every inbound session gets a
//! brand-new [`ProxyInstance`] built against whatever backends the config
//! provider reports at that moment.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::mcp::{connector::Backends, error::McpResult, proxy::ProxyInstance};

/// Source of the configured backend set.
pub trait ConfigProvider: Send + Sync {
    /// Current snapshot; read once per new session.
    fn current_backends(&self) -> Backends;
}

#[derive(Clone)]
pub struct ProxyManager {
    provider: Arc<dyn ConfigProvider>,
}

impl ProxyManager {
    pub fn new(provider: Arc<dyn ConfigProvider>) -> Self {
        Self { provider }
    }

    /// Start a proxy instance for a new session without waiting for it.
    ///
    /// The instance is bound to `shutdown` and closes its backends when it
    /// flips, or when the last handle to the instance is dropped.
    pub fn spawn_proxy(&self, shutdown: watch::Receiver<bool>) -> ProxyInstance {
        let backends = self.provider.current_backends();
        info!(
            backends = backends.len(),
            "Creating proxy instance for new session"
        );
        ProxyInstance::spawn(backends, shutdown)
    }

    /// Build a proxy instance and wait until every backend has been either
    /// attached or excluded.
    pub async fn new_proxy(&self, shutdown: watch::Receiver<bool>) -> McpResult<ProxyInstance> {
        let proxy = self.spawn_proxy(shutdown);
        proxy.ready().await?;
        Ok(proxy)
    }
}
