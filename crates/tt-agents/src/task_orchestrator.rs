//! TaskOrchestrator -- the single authority over which tasks are running and
//! what their externally visible lifecycle looks like.
//!
//! Each task runs as its own tokio task. The orchestrator owns the active
//! set, emits `agent.phase` / `task.complete` / `error` events, pauses runs
//! at the approval gate, and turns run failures (panics included) into
//! classified error events instead of propagating them.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tt_bridge::event_bus::EventBus;
use tt_bridge::protocol::{
    BridgeEvent, CompletionPayload, ErrorPayload, EventKind, PhasePayload,
};
use tt_bridge::tool_bridge::{BridgeError, ToolExecutionBridge};
use tt_core::config::Config;
use tt_core::types::{thread_id_for, StartTaskParams, Task, TaskId, TaskStatus, ToolCall, ToolResult};
use tt_harness::registry::ExecutionContext;

use crate::approval::{ApprovalDecision, ApprovalGate, ApprovalPolicy, ApprovalRequest};
use crate::classifier::{ErrorClassification, ErrorClassifier, ErrorReport, ErrorType};
use crate::recovery::RecoveryManager;
use crate::runtime::{AgentRuntime, RunError, RunOutcome, RunRequest};
use crate::state_machine::{StateMachineError, TaskSignal, TaskStateMachine};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task goal must not be empty")]
    EmptyGoal,
    #[error("no workspace root: pass one in the task context or configure general.workspace_root")]
    NoWorkspace,
    #[error("invalid task id: {0:?}")]
    InvalidTaskId(String),
    #[error("task already active: {0}")]
    TaskAlreadyActive(TaskId),
    #[error("task {0} is not awaiting approval")]
    StaleApproval(TaskId),
    #[error("orchestrator has been disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Why a tool call requested through a [`TaskHandle`] did not run.
#[derive(Debug, Error)]
pub enum ToolGateError {
    #[error("tool call '{0}' was rejected")]
    Rejected(String),
    #[error("tool '{0}' is denied by policy")]
    Denied(String),
    #[error("task was cancelled")]
    Cancelled,
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    State(#[from] StateMachineError),
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct PendingGate {
    request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalDecision>,
}

struct TaskEntry {
    task: Task,
    machine: TaskStateMachine,
    cancel: CancellationToken,
    /// Distinguishes runs that reuse a task id (retries).
    run_id: u64,
    pending: Option<PendingGate>,
}

impl TaskEntry {
    fn apply(&mut self, signal: TaskSignal) -> std::result::Result<TaskStatus, StateMachineError> {
        let status = self.machine.transition(signal)?;
        self.task.status = status;
        self.task.updated_at = Utc::now();
        Ok(status)
    }
}

/// How many finished tasks keep answering [`TaskOrchestrator::task_status`].
pub const DEFAULT_FINISHED_CAPACITY: usize = 1024;

/// Terminal statuses of the most recently finished tasks, oldest evicted
/// first.
struct FinishedLog {
    statuses: HashMap<TaskId, TaskStatus>,
    order: VecDeque<TaskId>,
    capacity: usize,
}

impl FinishedLog {
    fn new(capacity: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn record(&mut self, task_id: &TaskId, status: TaskStatus) {
        if self.statuses.insert(task_id.clone(), status).is_some() {
            self.order.retain(|id| id != task_id);
        }
        self.order.push_back(task_id.clone());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    fn forget(&mut self, task_id: &TaskId) {
        if self.statuses.remove(task_id).is_some() {
            self.order.retain(|id| id != task_id);
        }
    }

    fn get(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.statuses.get(task_id).copied()
    }

    fn len(&self) -> usize {
        self.statuses.len()
    }
}

struct Inner {
    user_id: String,
    default_workspace: Option<PathBuf>,
    bus: EventBus,
    bridge: Arc<ToolExecutionBridge>,
    runtime: Arc<dyn AgentRuntime>,
    gate: ApprovalGate,
    recovery: Option<Arc<RecoveryManager>>,
    classifier: ErrorClassifier,
    tasks: DashMap<TaskId, TaskEntry>,
    /// Last terminal status of tasks that left the active set.
    finished: Mutex<FinishedLog>,
    next_run_id: AtomicU64,
    disposed: AtomicBool,
}

impl Inner {
    fn emit(&self, task_id: &TaskId, kind: EventKind) {
        self.bus.publish(BridgeEvent::for_task(task_id.clone(), kind));
    }

    fn finished_log(&self) -> std::sync::MutexGuard<'_, FinishedLog> {
        self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, task_id: &TaskId, run_id: u64) -> bool {
        self.tasks
            .get(task_id)
            .is_some_and(|entry| entry.run_id == run_id)
    }

    /// Apply a non-terminal transition and publish the new phase. Events are
    /// published under the entry lock so phase order matches transition order.
    fn advance(&self, task_id: &TaskId, run_id: u64, signal: TaskSignal) -> Option<TaskStatus> {
        let mut entry = self.tasks.get_mut(task_id)?;
        if entry.run_id != run_id {
            return None;
        }
        match entry.apply(signal) {
            Ok(status) => {
                self.emit(task_id, EventKind::phase(status));
                Some(status)
            }
            Err(e) => {
                debug!(task_id = %task_id, error = %e, "ignoring transition");
                None
            }
        }
    }

    /// Move a task to a terminal status and out of the active set.
    ///
    /// `run_id` of `None` matches whatever run is current. Returns `false`
    /// when there was nothing to finish (unknown id, already finished, or a
    /// newer run owns the id).
    fn finish(
        &self,
        task_id: &TaskId,
        run_id: Option<u64>,
        signal: TaskSignal,
        completion: Completion,
    ) -> bool {
        let Some((_, mut entry)) = self
            .tasks
            .remove_if(task_id, |_, e| run_id.map_or(true, |r| e.run_id == r))
        else {
            return false;
        };

        let status = match entry.apply(signal) {
            Ok(status) => status,
            Err(e) => {
                // Live entries are never terminal, so Fail and Cancel always
                // apply. Treat anything else as a failure.
                warn!(task_id = %task_id, error = %e, "forcing task to failed");
                TaskStatus::Failed
            }
        };
        entry.cancel.cancel();
        // Dropping the responder wakes a run parked at the approval gate.
        entry.pending.take();
        self.finished_log().record(task_id, status);

        if let Some(payload) = completion.error {
            self.emit(task_id, EventKind::Error(payload));
        }
        self.emit(
            task_id,
            EventKind::TaskComplete(CompletionPayload {
                status,
                summary: completion.summary,
                reason: completion.reason,
            }),
        );
        true
    }

    /// Record the end of a run.
    fn complete_run(&self, task_id: &TaskId, run_id: u64, result: std::result::Result<RunOutcome, RunError>) {
        if !self.is_current(task_id, run_id) {
            debug!(task_id = %task_id, "run finished after task left the active set");
            return;
        }

        match result {
            Ok(outcome) => {
                if let Some(mut entry) = self.tasks.get_mut(task_id) {
                    if entry.run_id == run_id {
                        for signal in [TaskSignal::Act, TaskSignal::Finalize] {
                            if entry.machine.can_transition(signal) {
                                if let Ok(status) = entry.apply(signal) {
                                    self.emit(task_id, EventKind::phase(status));
                                }
                            }
                        }
                    }
                }
                if self.finish(task_id, Some(run_id), TaskSignal::Succeed, Completion::summary(outcome.summary)) {
                    info!(task_id = %task_id, "task succeeded");
                }
            }
            Err(RunError::Gate(ToolGateError::Rejected(tool))) => {
                if self.finish(task_id, Some(run_id), TaskSignal::Cancel, Completion::reason("rejected")) {
                    info!(task_id = %task_id, tool = %tool, "task cancelled after rejected tool call");
                }
            }
            Err(RunError::Gate(ToolGateError::Cancelled)) => {
                if self.finish(task_id, Some(run_id), TaskSignal::Cancel, Completion::reason("cancelled")) {
                    info!(task_id = %task_id, "task cancelled");
                }
            }
            Err(RunError::Gate(ToolGateError::Bridge(BridgeError::ToolNotFound(tool)))) => {
                warn!(task_id = %task_id, tool = %tool, "run requested an unknown tool");
                self.fail(task_id, run_id, ErrorPayload {
                    error: format!("tool not found: {tool}"),
                    code: "tool_not_found".to_string(),
                    recoverable: false,
                });
            }
            Err(RunError::Gate(ToolGateError::Denied(tool))) => {
                warn!(task_id = %task_id, tool = %tool, "run requested a denied tool");
                self.fail(task_id, run_id, ErrorPayload {
                    error: format!("tool '{tool}' is denied by policy"),
                    code: "tool_denied".to_string(),
                    recoverable: false,
                });
            }
            Err(RunError::Panicked(message)) => {
                let classification = self
                    .classifier
                    .classification_for(ErrorType::Crash, &format!("agent run crashed: {message}"));
                error!(task_id = %task_id, panic = %message, "agent run panicked");
                self.fail(task_id, run_id, error_payload(&classification));
            }
            Err(other) => {
                let report = match &other {
                    RunError::Failed { message, stack } => ErrorReport {
                        message: message.clone(),
                        stack: stack.clone(),
                    },
                    _ => ErrorReport::from_error(&other),
                };
                let classification = self.classifier.classify(&report);
                error!(
                    task_id = %task_id,
                    error_type = %classification.error_type,
                    recoverable = classification.recoverable,
                    error = %report.message,
                    "agent run failed"
                );
                self.fail(task_id, run_id, error_payload(&classification));
            }
        }
    }

    fn fail(&self, task_id: &TaskId, run_id: u64, payload: ErrorPayload) {
        let reason = payload.code.clone();
        let completion = Completion {
            summary: None,
            reason: Some(reason),
            error: Some(payload),
        };
        self.finish(task_id, Some(run_id), TaskSignal::Fail, completion);
    }
}

fn error_payload(classification: &ErrorClassification) -> ErrorPayload {
    ErrorPayload {
        error: classification.message.clone(),
        code: classification.error_type.to_string(),
        recoverable: classification.recoverable,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Default)]
struct Completion {
    summary: Option<String>,
    reason: Option<String>,
    error: Option<ErrorPayload>,
}

impl Completion {
    fn summary(summary: Option<String>) -> Self {
        Self {
            summary,
            ..Self::default()
        }
    }

    fn reason(reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder {
    runtime: Arc<dyn AgentRuntime>,
    bridge: Arc<ToolExecutionBridge>,
    user_id: String,
    default_workspace: Option<PathBuf>,
    gate: ApprovalGate,
    recovery: Option<Arc<RecoveryManager>>,
    finished_capacity: usize,
}

impl OrchestratorBuilder {
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Workspace used when a start request carries none.
    pub fn default_workspace(mut self, root: impl Into<PathBuf>) -> Self {
        self.default_workspace = Some(root.into());
        self
    }

    pub fn approval_gate(mut self, gate: ApprovalGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn recovery(mut self, recovery: Arc<RecoveryManager>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// How many finished tasks to remember for status queries.
    pub fn finished_capacity(mut self, capacity: usize) -> Self {
        self.finished_capacity = capacity;
        self
    }

    /// Take user id, default workspace, and approval policies from `config`.
    pub fn config(mut self, config: &Config) -> Self {
        self.user_id = config.general.user_id.clone();
        self.default_workspace = config.general.workspace_root.clone();
        self.gate = ApprovalGate::from_config(&config.approval);
        self
    }

    pub fn build(self) -> TaskOrchestrator {
        let classifier = self
            .recovery
            .as_ref()
            .map(|r| r.classifier())
            .unwrap_or_default();
        TaskOrchestrator {
            inner: Arc::new(Inner {
                user_id: self.user_id,
                default_workspace: self.default_workspace,
                bus: self.bridge.bus().clone(),
                bridge: self.bridge,
                runtime: self.runtime,
                gate: self.gate,
                recovery: self.recovery,
                classifier,
                tasks: DashMap::new(),
                finished: Mutex::new(FinishedLog::new(self.finished_capacity)),
                next_run_id: AtomicU64::new(1),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskOrchestrator
// ---------------------------------------------------------------------------

/// Starts, pauses, resumes, and cancels agent tasks.
///
/// Events go to the bus the [`ToolExecutionBridge`] was built with, so tool
/// events and lifecycle events share one stream.
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl TaskOrchestrator {
    pub fn builder(
        runtime: Arc<dyn AgentRuntime>,
        bridge: Arc<ToolExecutionBridge>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            runtime,
            bridge,
            user_id: "local".to_string(),
            default_workspace: None,
            gate: ApprovalGate::default(),
            recovery: None,
            finished_capacity: DEFAULT_FINISHED_CAPACITY,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Register a task and hand it to the runtime.
    ///
    /// Returns as soon as the task is active and its `planning` phase has
    /// been published; the run itself proceeds on a spawned tokio task, so
    /// this must be called from within a runtime.
    pub fn start_task(&self, params: StartTaskParams) -> Result<TaskId> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Disposed);
        }
        let goal = params.goal.trim();
        if goal.is_empty() {
            return Err(OrchestratorError::EmptyGoal);
        }
        let workspace_root = params
            .context
            .workspace_root
            .clone()
            .or_else(|| inner.default_workspace.clone())
            .ok_or(OrchestratorError::NoWorkspace)?;
        let task_id = params.task_id.clone().unwrap_or_else(TaskId::generate);
        if !task_id.is_well_formed() {
            return Err(OrchestratorError::InvalidTaskId(task_id.to_string()));
        }

        let run_id = inner.next_run_id.fetch_add(1, Ordering::Relaxed);
        let task = Task::new(task_id.clone(), &inner.user_id, goal, workspace_root.clone());
        let thread_id = task.thread_id.clone();
        let cancel = CancellationToken::new();

        match inner.tasks.entry(task_id.clone()) {
            Entry::Occupied(_) => return Err(OrchestratorError::TaskAlreadyActive(task_id)),
            Entry::Vacant(slot) => {
                inner.finished_log().forget(&task_id);
                slot.insert(TaskEntry {
                    task,
                    machine: TaskStateMachine::new(),
                    cancel: cancel.clone(),
                    run_id,
                    pending: None,
                });
                inner.emit(&task_id, EventKind::phase(TaskStatus::Planning));
            }
        }
        // dispose() may have taken its snapshot before the insert above.
        if inner.disposed.load(Ordering::SeqCst) {
            inner.finish(&task_id, Some(run_id), TaskSignal::Cancel, Completion::reason("disposed"));
            return Err(OrchestratorError::Disposed);
        }
        info!(task_id = %task_id, thread_id = %thread_id, resume = params.resume, "task started");

        let mut context = params.context;
        context.workspace_root = Some(workspace_root.clone());
        let request = RunRequest {
            task_id: task_id.clone(),
            thread_id: thread_id.clone(),
            goal: goal.to_string(),
            workspace_root: workspace_root.clone(),
            model: params.model,
            level: params.level,
            reasoning_level: params.reasoning_level,
            resume: params.resume,
            context,
        };
        let handle = TaskHandle {
            inner: Arc::clone(inner),
            task_id: task_id.clone(),
            thread_id,
            workspace_root,
            run_id,
            cancel,
        };

        let inner = Arc::clone(inner);
        let span = info_span!("task", task_id = %task_id, run_id);
        let spawned_id = task_id.clone();
        tokio::spawn(
            async move {
                let runtime = Arc::clone(&inner.runtime);
                // A nested task isolates panics in the run from this one.
                let joined = tokio::spawn(
                    async move { runtime.run(request, handle).await }.in_current_span(),
                )
                .await;
                let result = match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(RunError::Panicked(panic_message(e.into_panic()))),
                    Err(e) => Err(RunError::failed(format!("agent run aborted: {e}"))),
                };
                inner.complete_run(&spawned_id, run_id, result);
            }
            .instrument(span),
        );

        Ok(task_id)
    }

    /// Answer the approval request a task is parked on.
    ///
    /// Rejecting cancels the task without running the gated call.
    pub fn resume_with_approval(&self, task_id: &TaskId, decision: ApprovalDecision) -> Result<()> {
        let stale = || {
            warn!(task_id = %task_id, %decision, "approval decision for a task that is not awaiting approval");
            OrchestratorError::StaleApproval(task_id.clone())
        };

        let mut entry = self.inner.tasks.get_mut(task_id).ok_or_else(stale)?;
        if entry.machine.state() != TaskStatus::AwaitingApproval {
            return Err(stale());
        }
        let Some(pending) = entry.pending.take() else {
            return Err(stale());
        };

        match decision {
            ApprovalDecision::Approve => {
                if let Err(e) = entry.apply(TaskSignal::Approve) {
                    warn!(task_id = %task_id, error = %e, "approval transition refused");
                    entry.pending = Some(pending);
                    return Err(stale());
                }
                self.inner.emit(task_id, EventKind::phase(TaskStatus::Acting));
                drop(entry);
                info!(task_id = %task_id, tool = %pending.request.tool_call.name, "tool call approved");
                let _ = pending.responder.send(ApprovalDecision::Approve);
            }
            ApprovalDecision::Reject => {
                let run_id = entry.run_id;
                drop(entry);
                info!(task_id = %task_id, tool = %pending.request.tool_call.name, "tool call rejected, task cancelled");
                // The run must see Rejected before the cancellation token fires.
                let _ = pending.responder.send(ApprovalDecision::Reject);
                self.inner.finish(task_id, Some(run_id), TaskSignal::Cancel, Completion::reason("rejected"));
            }
        }
        Ok(())
    }

    /// Stop a task. Unknown and already-finished ids are ignored.
    pub fn cancel_task(&self, task_id: &TaskId) {
        if self
            .inner
            .finish(task_id, None, TaskSignal::Cancel, Completion::reason("cancelled"))
        {
            info!(task_id = %task_id, "task cancelled");
        } else {
            debug!(task_id = %task_id, "cancel for inactive task ignored");
        }
    }

    /// Cancel every active task, then close the event bus.
    ///
    /// Does not wait for runs to observe their cancellation.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids = self.active_task_ids();
        for id in &ids {
            self.inner
                .finish(id, None, TaskSignal::Cancel, Completion::reason("disposed"));
        }
        self.inner.bus.close();
        info!(cancelled = ids.len(), "orchestrator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Start a task again from scratch under the same id.
    ///
    /// The previous checkpoint is cleared first so the run does not resume
    /// from it.
    pub async fn retry_task(&self, mut params: StartTaskParams) -> Result<TaskId> {
        if let Some(task_id) = &params.task_id {
            if self.inner.tasks.contains_key(task_id) {
                return Err(OrchestratorError::TaskAlreadyActive(task_id.clone()));
            }
            if let Some(recovery) = &self.inner.recovery {
                // The run's thread is keyed by this orchestrator's user.
                let thread_id = thread_id_for(&self.inner.user_id, task_id);
                recovery.clear_thread(&thread_id).await;
            }
        }
        params.resume = false;
        self.start_task(params)
    }

    // -- introspection --------------------------------------------------------

    /// Live status for active tasks, last terminal status for finished ones.
    pub fn task_status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        if let Some(entry) = self.inner.tasks.get(task_id) {
            return Some(entry.machine.state());
        }
        self.inner.finished_log().get(task_id)
    }

    /// Number of finished tasks still remembered for status queries.
    pub fn finished_count(&self) -> usize {
        self.inner.finished_log().len()
    }

    pub fn task(&self, task_id: &TaskId) -> Option<Task> {
        self.inner.tasks.get(task_id).map(|e| e.task.clone())
    }

    pub fn active_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.inner.tasks.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn pending_approval(&self, task_id: &TaskId) -> Option<ApprovalRequest> {
        self.inner
            .tasks
            .get(task_id)
            .and_then(|e| e.pending.as_ref().map(|p| p.request.clone()))
    }

    pub fn active_tool_calls(&self, task_id: &TaskId) -> Vec<String> {
        self.inner
            .tasks
            .get(task_id)
            .map(|e| e.task.active_tool_calls.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// A run's view of its task: progress reporting and gated tool calls.
///
/// Calls made after the task has left the active set are ignored (for
/// reporting) or fail with [`ToolGateError::Cancelled`] (for tools).
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<Inner>,
    task_id: TaskId,
    thread_id: String,
    workspace_root: PathBuf,
    run_id: u64,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    /// Fires when the task is cancelled, rejected, or disposed.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report a phase change. Only `acting` and `finalizing` can be entered
    /// by the run; everything else is owned by the orchestrator.
    pub fn set_phase(&self, phase: TaskStatus) -> bool {
        let signal = match phase {
            TaskStatus::Acting => TaskSignal::Act,
            TaskStatus::Finalizing => TaskSignal::Finalize,
            other => {
                debug!(task_id = %self.task_id, phase = %other, "run cannot enter this phase");
                return false;
            }
        };
        self.inner.advance(&self.task_id, self.run_id, signal).is_some()
    }

    pub fn assistant_delta(&self, text: impl Into<String>) {
        if self.inner.is_current(&self.task_id, self.run_id) {
            self.inner
                .emit(&self.task_id, EventKind::AssistantDelta { text: text.into() });
        }
    }

    pub fn thinking_delta(&self, text: impl Into<String>) {
        if self.inner.is_current(&self.task_id, self.run_id) {
            self.inner
                .emit(&self.task_id, EventKind::ThinkingDelta { text: text.into() });
        }
    }

    /// Run a tool through the approval gate and the bridge.
    ///
    /// Unknown and denied tools fail before anything is published. Gated
    /// tools park the task in `awaiting-approval` until a decision arrives
    /// or the task is cancelled.
    pub async fn call_tool(&self, call: ToolCall) -> std::result::Result<ToolResult, ToolGateError> {
        if self.is_cancelled() || !self.inner.is_current(&self.task_id, self.run_id) {
            return Err(ToolGateError::Cancelled);
        }
        self.inner.bridge.resolve(&call.name)?;

        match self.inner.gate.check(&call.name) {
            ApprovalPolicy::Deny => {
                warn!(task_id = %self.task_id, tool = %call.name, "tool denied by policy");
                return Err(ToolGateError::Denied(call.name));
            }
            ApprovalPolicy::AutoApprove => {
                self.enter_acting();
            }
            ApprovalPolicy::RequireApproval => {
                self.await_approval(&call).await?;
            }
        }

        self.track_call(&call.id, true);
        let ctx = ExecutionContext::new(self.task_id.clone(), self.workspace_root.clone())
            .with_cancellation(self.cancel.clone());
        let result = self.inner.bridge.execute(&call, &ctx).await;
        self.track_call(&call.id, false);

        let result = result?;
        if self.is_cancelled() {
            return Err(ToolGateError::Cancelled);
        }
        Ok(result)
    }

    fn enter_acting(&self) {
        if let Some(entry) = self.inner.tasks.get(&self.task_id) {
            if entry.run_id != self.run_id || entry.machine.state() != TaskStatus::Planning {
                return;
            }
        }
        self.inner.advance(&self.task_id, self.run_id, TaskSignal::Act);
    }

    async fn await_approval(&self, call: &ToolCall) -> std::result::Result<(), ToolGateError> {
        let (tx, rx) = oneshot::channel();
        let request = ApprovalRequest::new(call.clone());
        {
            let Some(mut entry) = self.inner.tasks.get_mut(&self.task_id) else {
                return Err(ToolGateError::Cancelled);
            };
            if entry.run_id != self.run_id {
                return Err(ToolGateError::Cancelled);
            }
            if entry.machine.state() == TaskStatus::Planning {
                let status = entry.apply(TaskSignal::Act)?;
                self.inner.emit(&self.task_id, EventKind::phase(status));
            }
            let status = entry.apply(TaskSignal::RequestApproval)?;
            entry.pending = Some(PendingGate {
                request: request.clone(),
                responder: tx,
            });
            self.inner.emit(
                &self.task_id,
                EventKind::AgentPhase(PhasePayload {
                    phase: status,
                    approval: Some(request),
                }),
            );
        }
        info!(task_id = %self.task_id, tool = %call.name, call_id = %call.id, "awaiting approval");

        tokio::select! {
            biased;
            decision = rx => match decision {
                Ok(ApprovalDecision::Approve) => Ok(()),
                Ok(ApprovalDecision::Reject) => Err(ToolGateError::Rejected(call.name.clone())),
                Err(_) => Err(ToolGateError::Cancelled),
            },
            _ = self.cancel.cancelled() => Err(ToolGateError::Cancelled),
        }
    }

    fn track_call(&self, call_id: &str, active: bool) {
        if let Some(mut entry) = self.inner.tasks.get_mut(&self.task_id) {
            if entry.run_id != self.run_id {
                return;
            }
            if active {
                entry.task.active_tool_calls.insert(call_id.to_string());
            } else {
                entry.task.active_tool_calls.remove(call_id);
            }
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("thread_id", &self.thread_id)
            .field("run_id", &self.run_id)
            .finish()
    }
}
