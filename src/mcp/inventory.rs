//! Aggregate capability table.
//!
//! Thread-safe table of every tool, resource and prompt currently exposed by
//! one proxy instance, keyed by prefixed identifier. Each backend's sync pass
//! writes only its own entries; the aggregate server reads it to answer
//! list requests and to route calls.

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use rmcp::{
    model::{Prompt, Resource, Tool},
    service::Peer,
    RoleServer,
};
use tracing::debug;

use crate::mcp::{
    capability::{Capability, CapabilityKind},
    router::Route,
};

/// One entry exposed on the aggregate.
#[derive(Clone)]
pub struct Registered<C: Capability> {
    /// Backend that reported the entry
    pub backend: String,
    /// Identifier as the backend reported it
    pub original: String,
    /// Entry as advertised downstream (prefixed identifier)
    pub capability: C,
    pub(crate) route: Route<C>,
}

impl<C: Capability> Registered<C> {
    pub fn new(backend: String, original: String, capability: C, route: Route<C>) -> Self {
        Self {
            backend,
            original,
            capability,
            route,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    /// The identifier is owned by another backend; nothing was written.
    Collision { owner: String },
}

pub struct CapabilityTable {
    pub(crate) tools: DashMap<String, Registered<Tool>>,
    pub(crate) resources: DashMap<String, Registered<Resource>>,
    pub(crate) prompts: DashMap<String, Registered<Prompt>>,

    /// Downstream client, once it has finished initializing
    peer: RwLock<Option<Peer<RoleServer>>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
            resources: DashMap::new(),
            prompts: DashMap::new(),
            peer: RwLock::new(None),
        }
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityTable {
    /// Insert an entry unless another backend already owns the identifier.
    pub fn register<C: Capability>(&self, prefixed: String, entry: Registered<C>) -> Registration {
        match C::slot(self).entry(prefixed) {
            Entry::Occupied(mut existing) => {
                if existing.get().backend == entry.backend {
                    existing.insert(entry);
                    Registration::Inserted
                } else {
                    Registration::Collision {
                        owner: existing.get().backend.clone(),
                    }
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Registration::Inserted
            }
        }
    }

    /// Remove an entry, but only if `backend` owns it.
    pub fn unregister<C: Capability>(&self, prefixed: &str, backend: &str) -> bool {
        C::slot(self)
            .remove_if(prefixed, |_, entry| entry.backend == backend)
            .is_some()
    }

    pub fn get<C: Capability>(&self, prefixed: &str) -> Option<Registered<C>> {
        C::slot(self).get(prefixed).map(|entry| entry.value().clone())
    }

    pub fn route<C: Capability>(&self, prefixed: &str) -> Option<Route<C>> {
        C::slot(self).get(prefixed).map(|entry| entry.route.clone())
    }

    pub fn contains<C: Capability>(&self, prefixed: &str) -> bool {
        C::slot(self).contains_key(prefixed)
    }

    /// Advertised entries, ordered by identifier.
    pub fn list<C: Capability>(&self) -> Vec<C> {
        let mut entries: Vec<C> = C::slot(self)
            .iter()
            .map(|entry| entry.capability.clone())
            .collect();
        entries.sort_by(|a, b| a.identifier().cmp(b.identifier()));
        entries
    }

    /// Prefixed identifiers, ordered.
    pub fn identifiers<C: Capability>(&self) -> Vec<String> {
        let mut ids: Vec<String> = C::slot(self).iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Get count of registered items (tools, resources, prompts)
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.tools.len(), self.resources.len(), self.prompts.len())
    }

    pub fn attach_peer(&self, peer: Peer<RoleServer>) {
        *self.peer.write() = Some(peer);
    }

    /// Tell the downstream client that the list for `kind` changed.
    ///
    /// No-op until a client has initialized.
    pub async fn notify_changed(&self, kind: CapabilityKind) {
        let Some(peer) = self.peer.read().clone() else {
            return;
        };

        let result = match kind {
            CapabilityKind::Tool => peer.notify_tool_list_changed().await,
            CapabilityKind::Resource => peer.notify_resource_list_changed().await,
            CapabilityKind::Prompt => peer.notify_prompt_list_changed().await,
        };
        if let Err(e) = result {
            debug!(%kind, "failed to notify downstream list change: {}", e);
        }
    }
}
