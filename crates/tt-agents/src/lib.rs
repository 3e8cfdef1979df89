//! Task orchestration and recovery.
//!
//! [`task_orchestrator::TaskOrchestrator`] owns the set of running tasks and
//! drives each one through the [`state_machine`]. Runs are delegated to an
//! [`runtime::AgentRuntime`]; tool calls go through the [`approval`] gate and
//! the bridge. [`recovery::RecoveryManager`] finds threads interrupted by a
//! crash and [`classifier`] triages runtime errors.

pub mod approval;
pub mod classifier;
pub mod recovery;
pub mod runtime;
pub mod state_machine;
pub mod task_orchestrator;
