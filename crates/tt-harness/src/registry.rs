use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tt_core::types::TaskId;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Everything a tool needs to know about the task that invoked it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: TaskId,
    pub workspace_root: PathBuf,
    /// Fires when the owning task is cancelled or rejected.
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(task_id: TaskId, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            task_id,
            workspace_root: workspace_root.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
    #[error("tool execution cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ToolError>;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A named, executable tool.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value>;
}

type BoxedToolFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// Adapts an async closure into a [`Capability`].
pub struct FnCapability {
    name: String,
    description: String,
    handler: Box<dyn Fn(serde_json::Value, ExecutionContext) -> BoxedToolFuture + Send + Sync>,
}

impl FnCapability {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            handler: Box::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value> {
        (self.handler)(arguments, ctx.clone()).await
    }
}

// ---------------------------------------------------------------------------
// ToolRegistry
// ---------------------------------------------------------------------------

/// Name → capability map. Read-mostly after startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Capability>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its own name, returning the one it replaced.
    pub fn register(&self, capability: impl Capability + 'static) -> Option<Arc<dyn Capability>> {
        self.register_arc(Arc::new(capability))
    }

    pub fn register_arc(&self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name().to_string();
        debug!(tool = %name, "registering tool");
        self.tools.insert(name, capability)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.tools.remove(name).map(|(_, c)| c)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.tools.get(name).map(|c| Arc::clone(c.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
