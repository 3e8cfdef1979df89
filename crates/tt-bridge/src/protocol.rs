use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tt_core::types::{IncompleteThread, TaskId, TaskStatus, ToolCall, ToolResult};
use uuid::Uuid;

/// One entry on the event stream. Serializes as
/// `{"type": ..., "payload": ..., "timestamp": ..., "task_id": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// `None` only for process-wide events such as recovery notices.
    pub task_id: Option<TaskId>,
}

impl BridgeEvent {
    pub fn for_task(task_id: TaskId, kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            task_id: Some(task_id),
        }
    }

    pub fn global(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            task_id: None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    pub fn belongs_to(&self, task_id: &TaskId) -> bool {
        self.task_id.as_ref() == Some(task_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    #[serde(rename = "tool.call")]
    ToolCall(ToolCall),
    #[serde(rename = "tool.result")]
    ToolResult(ToolResult),
    #[serde(rename = "agent.phase")]
    AgentPhase(PhasePayload),
    #[serde(rename = "assistant.delta")]
    AssistantDelta { text: String },
    #[serde(rename = "thinking.delta")]
    ThinkingDelta { text: String },
    #[serde(rename = "task.complete")]
    TaskComplete(CompletionPayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(rename = "recovery.incomplete_tasks")]
    RecoveryIncompleteTasks { threads: Vec<IncompleteThread> },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::ToolCall(_) => "tool.call",
            EventKind::ToolResult(_) => "tool.result",
            EventKind::AgentPhase(_) => "agent.phase",
            EventKind::AssistantDelta { .. } => "assistant.delta",
            EventKind::ThinkingDelta { .. } => "thinking.delta",
            EventKind::TaskComplete(_) => "task.complete",
            EventKind::Error(_) => "error",
            EventKind::RecoveryIncompleteTasks { .. } => "recovery.incomplete_tasks",
        }
    }

    pub fn phase(phase: TaskStatus) -> Self {
        EventKind::AgentPhase(PhasePayload {
            phase,
            approval: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePayload {
    pub phase: TaskStatus,
    /// Present when `phase` is `awaiting-approval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
}

/// A gated tool call waiting for a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: Uuid,
    pub tool_call: ToolCall,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(tool_call: ToolCall) -> Self {
        Self {
            approval_id: Uuid::new_v4(),
            tool_call,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub code: String,
    pub recoverable: bool,
}
