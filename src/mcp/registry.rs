//! Diff-based capability synchronization.
//!
//! One [`CapabilityRegistry`] exists per (backend, kind). It remembers which
//! prefixed identifiers it put on the aggregate and, on every pass, brings the
//! aggregate in line with what the backend currently reports: new entries are
//! registered, vanished ones unregistered, and unchanged ones left alone.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use futures::TryStreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::mcp::{
    capability::{Capability, CapabilityKind},
    error::McpResult,
    inventory::{CapabilityTable, Registered, Registration},
    namespace::qualify_name,
    router,
    session::BackendSession,
};

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub kind: CapabilityKind,
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Entries skipped because another backend owns the identifier
    pub collisions: usize,
}

impl SyncReport {
    fn new(kind: CapabilityKind) -> Self {
        Self {
            kind,
            added: 0,
            removed: 0,
            unchanged: 0,
            collisions: 0,
        }
    }

    pub fn changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: +{} -{} ={} collisions={}",
            self.kind, self.added, self.removed, self.unchanged, self.collisions
        )
    }
}

pub struct CapabilityRegistry<C: Capability> {
    backend: String,
    session: Arc<dyn BackendSession>,
    table: Arc<CapabilityTable>,
    /// Prefixed identifiers this backend currently owns on the table
    registered: Mutex<HashSet<String>>,
    _kind: PhantomData<fn() -> C>,
}

impl<C: Capability> CapabilityRegistry<C> {
    pub fn new(
        backend: impl Into<String>,
        session: Arc<dyn BackendSession>,
        table: Arc<CapabilityTable>,
    ) -> Self {
        Self {
            backend: backend.into(),
            session,
            table,
            registered: Mutex::new(HashSet::new()),
            _kind: PhantomData,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Identifiers owned by this registry, ordered.
    pub async fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registered.lock().await.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Run one sync pass.
    ///
    /// Passes on the same registry are serialized. If the enumeration fails at
    /// any point the pass is abandoned and nothing on the table changes.
    pub async fn sync(&self) -> McpResult<SyncReport> {
        let mut registered = self.registered.lock().await;

        let reported: Vec<C> = C::list(self.session.as_ref())
            .try_collect()
            .await
            .inspect_err(|e| {
                warn!(
                    backend = %self.backend,
                    kind = %C::KIND,
                    "Enumeration failed, keeping previous state: {}",
                    e
                );
            })?;

        // prefixed -> (original, advertised entry)
        let mut desired: HashMap<String, (String, C)> = HashMap::with_capacity(reported.len());
        for mut item in reported {
            let original = item.identifier().to_string();
            let prefixed = qualify_name(&self.backend, &original);
            if desired.contains_key(&prefixed) {
                warn!(
                    backend = %self.backend,
                    kind = %C::KIND,
                    "Backend reported '{}' more than once, keeping the first",
                    prefixed
                );
                continue;
            }
            item.set_identifier(prefixed.clone());
            desired.insert(prefixed, (original, item));
        }

        let mut report = SyncReport::new(C::KIND);

        let stale: Vec<String> = registered
            .iter()
            .filter(|id| !desired.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            self.table.unregister::<C>(&id, &self.backend);
            registered.remove(&id);
            debug!(backend = %self.backend, kind = %C::KIND, "Unregistered '{}'", id);
            report.removed += 1;
        }

        for (prefixed, (original, capability)) in desired {
            if registered.contains(&prefixed) {
                report.unchanged += 1;
                continue;
            }

            let route = router::bind::<C>(Arc::clone(&self.session), original.clone());
            let entry = Registered::new(self.backend.clone(), original, capability, route);
            match self.table.register(prefixed.clone(), entry) {
                Registration::Inserted => {
                    debug!(backend = %self.backend, kind = %C::KIND, "Registered '{}'", prefixed);
                    registered.insert(prefixed);
                    report.added += 1;
                }
                Registration::Collision { owner } => {
                    warn!(
                        backend = %self.backend,
                        kind = %C::KIND,
                        owner = %owner,
                        "'{}' is already exposed by another backend, skipping",
                        prefixed
                    );
                    report.collisions += 1;
                }
            }
        }
        drop(registered);

        if report.changed() {
            self.table.notify_changed(C::KIND).await;
        }

        info!(
            backend = %self.backend,
            kind = %C::KIND,
            added = report.added,
            removed = report.removed,
            unchanged = report.unchanged,
            collisions = report.collisions,
            "Synchronized capabilities"
        );
        Ok(report)
    }
}
