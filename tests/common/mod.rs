// These modules are used by tests
#![allow(dead_code)]

pub mod mock_mcp_server;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chimera::{
    config::StaticProvider,
    mcp::{Backends, Connector, ProxyManager},
    server::build_app,
};
use tokio::{net::TcpListener, sync::watch};

/// Build a backend set from (name, connector) pairs.
pub fn backends(entries: Vec<(&str, Arc<dyn Connector>)>) -> Backends {
    Arc::new(
        entries
            .into_iter()
            .map(|(name, connector)| (name.to_string(), connector))
            .collect::<BTreeMap<_, _>>(),
    )
}

pub fn manager(backends: Backends) -> ProxyManager {
    ProxyManager::new(Arc::new(StaticProvider::new(backends)))
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

/// Aggregate served over streamable HTTP on an ephemeral port.
pub struct TestAggregate {
    pub url: String,
    pub shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestAggregate {
    pub async fn start(backends: Backends) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let app = build_app(manager(backends), shutdown_rx.clone());
        let mut stop = shutdown_rx;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.wait_for(|s| *s).await;
                })
                .await;
        });

        Self {
            url: format!("http://127.0.0.1:{}/mcp", port),
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}
