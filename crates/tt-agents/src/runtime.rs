use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tt_core::types::{AgentLevel, TaskContext, TaskId};

use crate::task_orchestrator::{TaskHandle, ToolGateError};

/// Everything the downstream run-loop needs to execute (or resume) a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub task_id: TaskId,
    /// Checkpoint key; the run-loop must persist under this id.
    pub thread_id: String,
    pub goal: String,
    pub workspace_root: PathBuf,
    pub model: Option<String>,
    pub level: Option<AgentLevel>,
    pub reasoning_level: Option<String>,
    /// Continue from the thread's existing checkpoint.
    pub resume: bool,
    pub context: TaskContext,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub summary: Option<String>,
}

impl RunOutcome {
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A tool call was refused or interrupted at the gate.
    #[error(transparent)]
    Gate(#[from] ToolGateError),
    #[error("{message}")]
    Failed {
        message: String,
        stack: Option<String>,
    },
    /// The run panicked; the payload is the panic message.
    #[error("agent run panicked: {0}")]
    Panicked(String),
}

impl RunError {
    pub fn failed(message: impl Into<String>) -> Self {
        RunError::Failed {
            message: message.into(),
            stack: None,
        }
    }

    pub fn failed_with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        RunError::Failed {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

/// The downstream agent run-loop.
///
/// A run reports progress and requests tool calls through its
/// [`TaskHandle`]. It should stop promptly once the handle's cancellation
/// token fires.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, request: RunRequest, handle: TaskHandle) -> Result<RunOutcome, RunError>;
}
