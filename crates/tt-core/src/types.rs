use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Separator between the user id and the task id inside a thread id.
pub const THREAD_ID_SEPARATOR: char = ':';

/// Opaque, immutable task identifier of the form `task_<unix_ms>_<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh id from the current time and nine base-36 characters
    /// of random entropy.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let entropy = Uuid::new_v4();
        let suffix: String = entropy
            .as_bytes()
            .iter()
            .take(ID_SUFFIX_LEN)
            .map(|b| ID_ALPHABET[(*b as usize) % ID_ALPHABET.len()] as char)
            .collect();
        Self(format!("task_{millis}_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A caller-supplied id is usable when it is non-empty and cannot be
    /// confused with the thread id separator.
    pub fn is_well_formed(&self) -> bool {
        !self.0.trim().is_empty() && !self.0.contains(THREAD_ID_SEPARATOR)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Thread ids
// ---------------------------------------------------------------------------

/// Derive the checkpoint thread id for a task. Deterministic in both inputs.
pub fn thread_id_for(user_id: &str, task_id: &TaskId) -> String {
    format!("{user_id}{THREAD_ID_SEPARATOR}{task_id}")
}

/// The components recovered from a thread id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedThreadId {
    pub user_id: String,
    pub task_id: TaskId,
}

/// Inverse of [`thread_id_for`]. Returns `None` for ids that were not
/// produced by it.
pub fn parse_thread_id(thread_id: &str) -> Option<ParsedThreadId> {
    let (user_id, task_id) = thread_id.rsplit_once(THREAD_ID_SEPARATOR)?;
    if user_id.is_empty() || task_id.trim().is_empty() {
        return None;
    }
    Some(ParsedThreadId {
        user_id: user_id.to_string(),
        task_id: TaskId::from(task_id),
    })
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Planning,
    Acting,
    AwaitingApproval,
    Finalizing,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Planning => "planning",
            TaskStatus::Acting => "acting",
            TaskStatus::AwaitingApproval => "awaiting-approval",
            TaskStatus::Finalizing => "finalizing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Start parameters
// ---------------------------------------------------------------------------

/// Autonomy level requested for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentLevel {
    L1,
    L2,
    L3,
}

/// Where a task runs and what the caller was looking at when it started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTaskParams {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<AgentLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_level: Option<String>,
    /// Continue from the thread's existing checkpoint instead of starting clean.
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub context: TaskContext,
}

impl StartTaskParams {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            task_id: None,
            model: None,
            level: None,
            reasoning_level: None,
            resume: false,
            context: TaskContext::default(),
        }
    }

    pub fn with_workspace(mut self, root: impl Into<PathBuf>) -> Self {
        self.context.workspace_root = Some(root.into());
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_level(mut self, level: AgentLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn resuming(mut self) -> Self {
        self.resume = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub thread_id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub workspace_root: PathBuf,
    /// In-flight tool call ids, kept for diagnostics only.
    pub active_tool_calls: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: TaskId,
        user_id: &str,
        goal: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id_for(user_id, &id),
            id,
            goal: goal.into(),
            status: TaskStatus::Planning,
            workspace_root: workspace_root.into(),
            active_tool_calls: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Exactly one of a value or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Result(serde_json::Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_id: String,
    pub tool_name: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, value: serde_json::Value) -> Self {
        Self {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Result(value),
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Error(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            ToolOutcome::Result(v) => Some(v),
            ToolOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Result(_) => None,
            ToolOutcome::Error(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// IncompleteThread
// ---------------------------------------------------------------------------

/// A checkpointed thread that was interrupted before it finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteThread {
    pub thread_id: String,
    pub task_id: TaskId,
    pub last_checkpoint_id: String,
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
