//! In-memory backends for unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rmcp::{
    model::{
        AnnotateAble, CallToolResult, Content, ErrorData, GetPromptResult, JsonObject, Prompt,
        PromptMessage, PromptMessageRole, RawResource, ReadResourceResult, Resource,
        ResourceContents, Tool,
    },
    service::ServiceError,
};

use crate::mcp::{
    capability::CapabilityKind,
    connector::Connector,
    error::{McpError, McpResult},
    session::{BackendSession, ListChangedNotifier},
};

pub(crate) fn test_tool(name: &str) -> Tool {
    Tool::new(
        name.to_string(),
        format!("test tool {}", name),
        Arc::new(JsonObject::new()),
    )
}

pub(crate) fn test_resource(uri: &str) -> Resource {
    RawResource::new(uri, uri).no_annotation()
}

pub(crate) fn test_prompt(name: &str) -> Prompt {
    Prompt::new(name, Some(format!("test prompt {}", name)), None)
}

fn rejected(what: &str) -> McpError {
    McpError::Backend(ServiceError::McpError(ErrorData::invalid_params(
        format!("unknown {}", what),
        None,
    )))
}

#[derive(Default)]
struct FakeState {
    tools: Mutex<Vec<String>>,
    resources: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    /// Enumeration of this kind fails after yielding `n` items
    fail_after: Mutex<Option<(CapabilityKind, usize)>>,
    list_delay: Mutex<Option<Duration>>,
    lists: AtomicUsize,
    closes: AtomicUsize,
}

/// Scriptable backend session. Clones share state.
#[derive(Clone)]
pub(crate) struct FakeSession {
    backend: String,
    state: Arc<FakeState>,
}

impl FakeSession {
    pub fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            state: Arc::new(FakeState::default()),
        }
    }

    pub fn set_tools(&self, names: &[&str]) {
        *self.state.tools.lock() = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn set_resources(&self, uris: &[&str]) {
        *self.state.resources.lock() = uris.iter().map(|n| n.to_string()).collect();
    }

    pub fn set_prompts(&self, names: &[&str]) {
        *self.state.prompts.lock() = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn fail_after(&self, kind: CapabilityKind, items: usize) {
        *self.state.fail_after.lock() = Some((kind, items));
    }

    pub fn clear_failure(&self) {
        *self.state.fail_after.lock() = None;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.state.list_delay.lock() = Some(delay);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lists.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    fn enumerate<T: Send + 'static>(
        &self,
        kind: CapabilityKind,
        names: Vec<String>,
        build: fn(&str) -> T,
    ) -> BoxStream<'static, McpResult<T>> {
        self.state.lists.fetch_add(1, Ordering::SeqCst);

        let mut items: Vec<McpResult<T>> = names.iter().map(|n| Ok(build(n))).collect();
        if let Some((failing, after)) = *self.state.fail_after.lock() {
            if failing == kind {
                items.truncate(after);
                items.push(Err(McpError::Transport(format!("{} page failed", kind))));
            }
        }

        let delay = *self.state.list_delay.lock();
        stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            stream::iter(items)
        })
        .flatten()
        .boxed()
    }
}

#[async_trait]
impl BackendSession for FakeSession {
    fn list_tools(&self) -> BoxStream<'static, McpResult<Tool>> {
        let names = self.state.tools.lock().clone();
        self.enumerate(CapabilityKind::Tool, names, test_tool)
    }

    fn list_resources(&self) -> BoxStream<'static, McpResult<Resource>> {
        let names = self.state.resources.lock().clone();
        self.enumerate(CapabilityKind::Resource, names, test_resource)
    }

    fn list_prompts(&self) -> BoxStream<'static, McpResult<Prompt>> {
        let names = self.state.prompts.lock().clone();
        self.enumerate(CapabilityKind::Prompt, names, test_prompt)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult> {
        if !self.state.tools.lock().iter().any(|t| t == name) {
            return Err(rejected(&format!("tool {}", name)));
        }
        let message = arguments
            .as_ref()
            .and_then(|args| args.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{}/{}: {}",
            self.backend, name, message
        ))]))
    }

    async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        if !self.state.resources.lock().iter().any(|r| r == uri) {
            return Err(rejected(&format!("resource {}", uri)));
        }
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(
                format!("{} contents", self.backend),
                uri,
            )],
        })
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: Option<JsonObject>,
    ) -> McpResult<GetPromptResult> {
        if !self.state.prompts.lock().iter().any(|p| p == name) {
            return Err(rejected(&format!("prompt {}", name)));
        }
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage::new_text(
                PromptMessageRole::User,
                format!("{}/{}", self.backend, name),
            )],
        })
    }

    async fn close(&self) -> McpResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out a prepared [`FakeSession`], or failing.
pub(crate) struct FakeConnector {
    session: Option<FakeSession>,
    delay: Option<Duration>,
    notifiers: Mutex<Vec<ListChangedNotifier>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(session: FakeSession) -> Self {
        Self {
            session: Some(session),
            delay: None,
            notifiers: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            session: None,
            delay: None,
            notifiers: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Notifier handed to the most recent connect.
    pub fn last_notifier(&self) -> Option<ListChangedNotifier> {
        self.notifiers.lock().last().cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        backend: &str,
        notifier: ListChangedNotifier,
    ) -> McpResult<Arc<dyn BackendSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.session {
            Some(session) => {
                self.notifiers.lock().push(notifier);
                Ok(Arc::new(session.clone()))
            }
            None => Err(McpError::ConnectionFailed(format!(
                "backend '{}' refused connection",
                backend
            ))),
        }
    }
}
