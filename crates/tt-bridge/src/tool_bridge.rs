use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use tt_core::config::BridgeConfig;
use tt_core::types::{ToolCall, ToolResult};
use tt_harness::registry::{Capability, ExecutionContext, ToolError, ToolRegistry};

use crate::event_bus::EventBus;
use crate::protocol::{BridgeEvent, EventKind};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

// ---------------------------------------------------------------------------
// ToolExecutor
// ---------------------------------------------------------------------------

/// Wherever tools actually run, typically another process on the far side
/// of an IPC channel.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &ExecutionContext,
    ) -> std::result::Result<Value, ToolError>;
}

type BoxedExecFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, ToolError>> + Send>>;

/// Closure adapter for [`ToolExecutor`].
pub struct FnExecutor {
    handler: Box<dyn Fn(String, Value, ExecutionContext) -> BoxedExecFuture + Send + Sync>,
}

impl FnExecutor {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String, Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |name, args, ctx| Box::pin(handler(name, args, ctx))),
        }
    }
}

#[async_trait]
impl ToolExecutor for FnExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &ExecutionContext,
    ) -> std::result::Result<Value, ToolError> {
        (self.handler)(tool_name.to_string(), arguments, ctx.clone()).await
    }
}

// ---------------------------------------------------------------------------
// ToolExecutionBridge
// ---------------------------------------------------------------------------

/// The only path from orchestration to tool side effects.
///
/// Every call that passes name resolution emits a `tool.call` event before
/// dispatch and exactly one `tool.result` afterwards, whether the tool
/// succeeded, failed, timed out, or was cancelled.
pub struct ToolExecutionBridge {
    registry: Arc<ToolRegistry>,
    executor: RwLock<Option<Arc<dyn ToolExecutor>>>,
    bus: EventBus,
    timeout: Duration,
}

impl ToolExecutionBridge {
    pub fn new(registry: Arc<ToolRegistry>, bus: EventBus) -> Self {
        Self {
            registry,
            executor: RwLock::new(None),
            bus,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Bridge with the per-call timeout from `[bridge]`.
    pub fn from_config(registry: Arc<ToolRegistry>, bus: EventBus, config: &BridgeConfig) -> Self {
        Self::new(registry, bus).with_timeout(config.tool_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Install the remote executor. Last writer wins; returns whether an
    /// earlier executor was replaced.
    pub fn register_executor(&self, executor: impl ToolExecutor + 'static) -> bool {
        let mut slot = self.executor.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = slot.replace(Arc::new(executor)).is_some();
        info!(replaced, "tool executor registered");
        replaced
    }

    pub fn register_fn<F, Fut>(&self, handler: F) -> bool
    where
        F: Fn(String, Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ToolError>> + Send + 'static,
    {
        self.register_executor(FnExecutor::new(handler))
    }

    /// Drop the remote executor; calls fall back to in-process capabilities.
    pub fn clear_executor(&self) {
        self.executor
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn has_executor(&self) -> bool {
        self.executor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn current_executor(&self) -> Option<Arc<dyn ToolExecutor>> {
        self.executor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve `name` against the registry.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>> {
        self.registry
            .get(name)
            .ok_or_else(|| BridgeError::ToolNotFound(name.to_string()))
    }

    /// Execute one tool call.
    ///
    /// Only name resolution fails the call itself, and it does so before any
    /// event is emitted. Every other failure comes back as an error
    /// [`ToolResult`].
    pub async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> Result<ToolResult> {
        let capability = self.resolve(&call.name)?;
        let executor = self.current_executor();

        self.bus.publish(BridgeEvent::for_task(
            ctx.task_id.clone(),
            EventKind::ToolCall(call.clone()),
        ));
        debug!(task_id = %ctx.task_id, tool = %call.name, call_id = %call.id, "dispatching tool call");

        let started = Instant::now();
        let dispatch = async {
            match executor {
                Some(executor) => {
                    executor
                        .execute(&call.name, call.arguments.clone(), ctx)
                        .await
                }
                None => capability.execute(call.arguments.clone(), ctx).await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            res = tokio::time::timeout(self.timeout, dispatch) => match res {
                Ok(res) => res,
                Err(_) => Err(ToolError::Failed(format!(
                    "tool '{}' timed out after {}s",
                    call.name,
                    self.timeout.as_secs_f64()
                ))),
            },
        };

        let result = match outcome {
            Ok(value) => ToolResult::success(call, value),
            Err(e) => {
                warn!(
                    task_id = %ctx.task_id,
                    tool = %call.name,
                    call_id = %call.id,
                    error = %e,
                    "tool call failed"
                );
                ToolResult::failure(call, e.to_string())
            }
        };
        debug!(
            task_id = %ctx.task_id,
            call_id = %call.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            is_error = result.is_error(),
            "tool call finished"
        );

        self.bus.publish(BridgeEvent::for_task(
            ctx.task_id.clone(),
            EventKind::ToolResult(result.clone()),
        ));
        Ok(result)
    }
}

impl std::fmt::Debug for ToolExecutionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutionBridge")
            .field("registry", &self.registry)
            .field("has_executor", &self.has_executor())
            .field("timeout", &self.timeout)
            .finish()
    }
}
