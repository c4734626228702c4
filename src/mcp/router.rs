//! Call routing from aggregate identifiers back to backends.
//!
//! A [`Route`] is bound once, at registration, to the backend session and the
//! identifier exactly as that backend reported it. The prefixed identifier is
//! never parsed back into the original.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::mcp::{capability::Capability, error::McpResult, session::BackendSession};

pub type Route<C> = Arc<
    dyn Fn(<C as Capability>::Args) -> BoxFuture<'static, McpResult<<C as Capability>::Output>>
        + Send
        + Sync,
>;

/// Bind a route for one registered entry.
///
/// The closure owns its own session handle and identifier; results and errors
/// are returned exactly as the backend produced them.
pub fn bind<C: Capability>(session: Arc<dyn BackendSession>, original: String) -> Route<C> {
    Arc::new(move |args: C::Args| C::invoke(Arc::clone(&session), original.clone(), args))
}
