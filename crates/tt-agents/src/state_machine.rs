use serde::{Deserialize, Serialize};
use std::fmt;
use tt_core::types::TaskStatus;

// ---------------------------------------------------------------------------
// TaskSignal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSignal {
    Act,
    RequestApproval,
    Approve,
    Finalize,
    Succeed,
    Fail,
    Cancel,
}

impl fmt::Display for TaskSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskSignal::Act => "Act",
            TaskSignal::RequestApproval => "RequestApproval",
            TaskSignal::Approve => "Approve",
            TaskSignal::Finalize => "Finalize",
            TaskSignal::Succeed => "Succeed",
            TaskSignal::Fail => "Fail",
            TaskSignal::Cancel => "Cancel",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// The signal is not valid in the current status. Every signal is
    /// invalid once the task is terminal.
    #[error("invalid transition: cannot apply {signal} in status {status}")]
    InvalidTransition {
        status: TaskStatus,
        signal: TaskSignal,
    },
}

// ---------------------------------------------------------------------------
// TaskStateMachine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    current: TaskStatus,
    history: Vec<(TaskStatus, TaskSignal, TaskStatus)>,
}

impl TaskStateMachine {
    /// Create a new state machine starting in `Planning`.
    pub fn new() -> Self {
        Self {
            current: TaskStatus::Planning,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskStatus {
        self.current
    }

    pub fn history(&self) -> &[(TaskStatus, TaskSignal, TaskStatus)] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Attempt a transition driven by `signal`.
    ///
    /// Valid transitions:
    /// - Planning         + Act             -> Acting
    /// - Acting           + RequestApproval -> AwaitingApproval
    /// - AwaitingApproval + Approve         -> Acting
    /// - Acting           + Finalize        -> Finalizing
    /// - Finalizing       + Succeed         -> Succeeded
    /// - any non-terminal + Fail            -> Failed
    /// - any non-terminal + Cancel          -> Cancelled
    pub fn transition(&mut self, signal: TaskSignal) -> Result<TaskStatus, StateMachineError> {
        let next = match (self.current, signal) {
            (s, _) if s.is_terminal() => None,
            (TaskStatus::Planning, TaskSignal::Act) => Some(TaskStatus::Acting),
            (TaskStatus::Acting, TaskSignal::RequestApproval) => Some(TaskStatus::AwaitingApproval),
            (TaskStatus::AwaitingApproval, TaskSignal::Approve) => Some(TaskStatus::Acting),
            (TaskStatus::Acting, TaskSignal::Finalize) => Some(TaskStatus::Finalizing),
            (TaskStatus::Finalizing, TaskSignal::Succeed) => Some(TaskStatus::Succeeded),
            (_, TaskSignal::Fail) => Some(TaskStatus::Failed),
            (_, TaskSignal::Cancel) => Some(TaskStatus::Cancelled),
            _ => None,
        };
        let Some(next) = next else {
            return Err(StateMachineError::InvalidTransition {
                status: self.current,
                signal,
            });
        };

        let from = self.current;
        self.current = next;
        self.history.push((from, signal, next));
        tracing::debug!(from = %from, signal = %signal, to = %next, "task state transition");
        Ok(next)
    }

    pub fn can_transition(&self, signal: TaskSignal) -> bool {
        self.clone().transition(signal).is_ok()
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_with_approval_round_trip() {
        let mut sm = TaskStateMachine::new();
        sm.transition(TaskSignal::Act).unwrap();
        sm.transition(TaskSignal::RequestApproval).unwrap();
        sm.transition(TaskSignal::Approve).unwrap();
        sm.transition(TaskSignal::Finalize).unwrap();
        let s = sm.transition(TaskSignal::Succeed).unwrap();
        assert_eq!(s, TaskStatus::Succeeded);
        assert_eq!(sm.history().len(), 5);
    }

    #[test]
    fn cannot_skip_acting() {
        let mut sm = TaskStateMachine::new();
        assert!(sm.transition(TaskSignal::Finalize).is_err());
        assert!(sm.transition(TaskSignal::RequestApproval).is_err());
        assert_eq!(sm.state(), TaskStatus::Planning);
        assert!(sm.history().is_empty());
    }

    #[test]
    fn cancel_and_fail_from_any_live_status() {
        for path in [
            vec![],
            vec![TaskSignal::Act],
            vec![TaskSignal::Act, TaskSignal::RequestApproval],
            vec![TaskSignal::Act, TaskSignal::Finalize],
        ] {
            for terminal in [TaskSignal::Cancel, TaskSignal::Fail] {
                let mut sm = TaskStateMachine::new();
                for s in &path {
                    sm.transition(*s).unwrap();
                }
                assert!(sm.transition(terminal).unwrap().is_terminal());
            }
        }
    }

    #[test]
    fn terminal_status_rejects_everything() {
        let mut sm = TaskStateMachine::new();
        sm.transition(TaskSignal::Cancel).unwrap();
        for signal in [
            TaskSignal::Act,
            TaskSignal::Approve,
            TaskSignal::Cancel,
            TaskSignal::Fail,
            TaskSignal::Succeed,
        ] {
            let err = sm.transition(signal).unwrap_err();
            assert_eq!(
                err,
                StateMachineError::InvalidTransition {
                    status: TaskStatus::Cancelled,
                    signal
                }
            );
        }
        assert_eq!(sm.state(), TaskStatus::Cancelled);
    }

    #[test]
    fn can_transition_does_not_mutate() {
        let sm = TaskStateMachine::new();
        assert!(sm.can_transition(TaskSignal::Act));
        assert!(!sm.can_transition(TaskSignal::Succeed));
        assert_eq!(sm.state(), TaskStatus::Planning);
    }
}
