//! Proxy instance lifecycle.
//!
//! A [`ProxyInstance`] is the aggregate for exactly one inbound session. It
//! connects to every configured backend in parallel, performs the initial
//! sync, keeps per-kind resync workers alive while serving, and closes every
//! backend session it opened once the session ends or the process shuts down.
//!
//! Handles are cheap clones. When the last one is dropped the instance closes
//! itself.

use std::{fmt, sync::Arc};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rmcp::model::{
    CallToolResult, GetPromptResult, JsonObject, Prompt, ReadResourceResult, Resource, Tool,
};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::mcp::{
    capability::{Capability, CapabilityKind},
    connector::{Backends, Connector},
    error::{McpError, McpResult},
    inventory::CapabilityTable,
    registry::CapabilityRegistry,
    session::{BackendSession, ListChangedNotifier},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Assembling,
    Serving,
    Closing,
    Closed,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyState::Assembling => "assembling",
            ProxyState::Serving => "serving",
            ProxyState::Closing => "closing",
            ProxyState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
pub struct ProxyInstance {
    inner: Arc<Inner>,
}

struct Inner {
    table: Arc<CapabilityTable>,
    state: watch::Receiver<ProxyState>,
    backends: Arc<RwLock<Vec<String>>>,
    /// Only held here, so dropping the last handle also ends the instance.
    close_tx: watch::Sender<bool>,
}

/// A backend that connected during assembly.
struct AttachedBackend {
    name: String,
    session: Arc<dyn BackendSession>,
}

impl ProxyInstance {
    /// Start assembling an aggregate over `backends`.
    ///
    /// Returns immediately in [`ProxyState::Assembling`]. `shutdown` is the
    /// enclosing cancellation scope; flipping it to `true` closes the instance.
    pub fn spawn(backends: Backends, shutdown: watch::Receiver<bool>) -> Self {
        let table = Arc::new(CapabilityTable::new());
        let (state_tx, state_rx) = watch::channel(ProxyState::Assembling);
        let (close_tx, close_rx) = watch::channel(false);
        let names = Arc::new(RwLock::new(Vec::new()));

        tokio::spawn(run_lifecycle(
            backends,
            Arc::clone(&table),
            Arc::clone(&names),
            state_tx,
            shutdown,
            close_rx,
        ));

        Self {
            inner: Arc::new(Inner {
                table,
                state: state_rx,
                backends: names,
                close_tx,
            }),
        }
    }

    pub fn state(&self) -> ProxyState {
        *self.inner.state.borrow()
    }

    /// Backends that connected successfully, ordered by name.
    pub fn backends(&self) -> Vec<String> {
        self.inner.backends.read().clone()
    }

    pub fn table(&self) -> &Arc<CapabilityTable> {
        &self.inner.table
    }

    /// Wait until assembly has finished.
    ///
    /// Fails if the instance started closing before it ever served.
    pub async fn ready(&self) -> McpResult<()> {
        let mut state = self.inner.state.clone();
        let reached = state
            .wait_for(|s| *s != ProxyState::Assembling)
            .await
            .map(|s| *s)
            .map_err(|_| McpError::Closed)?;
        match reached {
            ProxyState::Serving => Ok(()),
            _ => Err(McpError::Closed),
        }
    }

    /// Close every backend session and wait for teardown to finish.
    pub async fn close(&self) {
        self.inner.close_tx.send_replace(true);
        self.closed().await;
    }

    /// Wait until the instance reaches [`ProxyState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.inner.state.clone();
        let _ = state.wait_for(|s| *s == ProxyState::Closed).await;
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        self.inner.table.list::<Tool>()
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.inner.table.list::<Resource>()
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.inner.table.list::<Prompt>()
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult> {
        self.invoke::<Tool>(name, arguments, McpError::ToolNotFound)
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        self.invoke::<Resource>(uri, (), McpError::ResourceNotFound)
            .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<GetPromptResult> {
        self.invoke::<Prompt>(name, arguments, McpError::PromptNotFound)
            .await
    }

    async fn invoke<C: Capability>(
        &self,
        prefixed: &str,
        args: C::Args,
        not_found: fn(String) -> McpError,
    ) -> McpResult<C::Output> {
        let route = self
            .inner
            .table
            .route::<C>(prefixed)
            .ok_or_else(|| not_found(prefixed.to_string()))?;
        route(args).await
    }
}

async fn run_lifecycle(
    backends: Backends,
    table: Arc<CapabilityTable>,
    names: Arc<RwLock<Vec<String>>>,
    state: watch::Sender<ProxyState>,
    mut shutdown: watch::Receiver<bool>,
    mut close: watch::Receiver<bool>,
) {
    let (stop_tx, stop_rx) = watch::channel(false);
    // Sessions are recorded here as soon as they connect, so teardown reaches
    // them even if assembly is cancelled mid-sync.
    let owned: Arc<Mutex<Vec<AttachedBackend>>> = Arc::new(Mutex::new(Vec::new()));

    let mut tasks: Vec<JoinHandle<()>> = backends
        .iter()
        .map(|(name, connector)| {
            tokio::spawn(attach_backend(
                name.clone(),
                Arc::clone(connector),
                Arc::clone(&table),
                Arc::clone(&owned),
                stop_rx.clone(),
            ))
        })
        .collect();

    let assembled = tokio::select! {
        results = join_all(tasks.iter_mut()) => Some(results),
        _ = cancelled(&mut shutdown, &mut close) => None,
    };

    let completed = assembled.is_some();
    match assembled {
        Some(results) => {
            for result in results {
                if let Err(e) = result {
                    warn!("Backend assembly task failed: {}", e);
                }
            }
        }
        None => {
            debug!("Cancelled while assembling");
            for task in &tasks {
                task.abort();
            }
            // wait for the aborts to land before taking ownership
            join_all(tasks).await;
        }
    }

    let mut attached = std::mem::take(&mut *owned.lock());
    attached.sort_by(|a, b| a.name.cmp(&b.name));
    *names.write() = attached.iter().map(|b| b.name.clone()).collect();

    if completed {
        let (tools, resources, prompts) = table.counts();
        info!(
            backends = attached.len(),
            configured = backends.len(),
            tools,
            resources,
            prompts,
            "Proxy instance serving"
        );
        state.send_replace(ProxyState::Serving);
        cancelled(&mut shutdown, &mut close).await;
    }

    state.send_replace(ProxyState::Closing);
    stop_tx.send_replace(true);

    let closes = attached.into_iter().map(|backend| async move {
        if let Err(e) = backend.session.close().await {
            warn!(backend = %backend.name, "Failed to close backend session: {}", e);
        }
    });
    join_all(closes).await;

    state.send_replace(ProxyState::Closed);
    info!("Proxy instance closed");
}

/// Resolves when the enclosing scope shuts down or the instance is closed.
///
/// Dropping the external shutdown sender does not count as cancellation;
/// dropping every instance handle does.
async fn cancelled(shutdown: &mut watch::Receiver<bool>, close: &mut watch::Receiver<bool>) {
    let external = async {
        if shutdown.wait_for(|s| *s).await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = external => {}
        _ = close.wait_for(|c| *c) => {}
    }
}

/// Connect one backend and run its initial sync.
///
/// A backend that cannot be reached is excluded from this instance. A
/// connected session is pushed to `owned` before anything else happens.
async fn attach_backend(
    name: String,
    connector: Arc<dyn Connector>,
    table: Arc<CapabilityTable>,
    owned: Arc<Mutex<Vec<AttachedBackend>>>,
    stop: watch::Receiver<bool>,
) {
    let notifier = ListChangedNotifier::new();
    let session = match connector.connect(&name, notifier.clone()).await {
        Ok(session) => session,
        Err(e) => {
            warn!(backend = %name, "Failed to connect, excluding backend: {}", e);
            return;
        }
    };
    owned.lock().push(AttachedBackend {
        name: name.clone(),
        session: Arc::clone(&session),
    });

    let tools = Arc::new(CapabilityRegistry::<Tool>::new(
        name.clone(),
        Arc::clone(&session),
        Arc::clone(&table),
    ));
    let resources = Arc::new(CapabilityRegistry::<Resource>::new(
        name.clone(),
        Arc::clone(&session),
        Arc::clone(&table),
    ));
    let prompts = Arc::new(CapabilityRegistry::<Prompt>::new(
        name.clone(),
        Arc::clone(&session),
        Arc::clone(&table),
    ));

    // Per-kind failures are already logged; the backend stays attached and a
    // later list-changed notification gets another chance.
    let _ = tokio::join!(tools.sync(), resources.sync(), prompts.sync());

    spawn_resync(tools, notifier.signal(CapabilityKind::Tool), stop.clone());
    spawn_resync(resources, notifier.signal(CapabilityKind::Resource), stop.clone());
    spawn_resync(prompts, notifier.signal(CapabilityKind::Prompt), stop);
}

/// Re-run a registry's sync pass each time its backend reports a change.
fn spawn_resync<C: Capability>(
    registry: Arc<CapabilityRegistry<C>>,
    signal: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = signal.notified() => {
                    if let Err(e) = registry.sync().await {
                        debug!(backend = %registry.backend(), kind = %C::KIND, "Resync failed: {}", e);
                    }
                }
                // keep the non-Send watch::Ref inside this branch
                _ = async { let _ = stop.wait_for(|s| *s).await; } => {
                    debug!(backend = %registry.backend(), kind = %C::KIND, "Resync worker stopping");
                    break;
                }
            }
        }
    })
}
