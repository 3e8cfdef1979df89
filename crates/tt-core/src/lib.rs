//! Core data model, configuration, and checkpoint persistence for tether.
//!
//! Everything the orchestration crates share lives here: task identity and
//! status, tool call/result records, the TOML configuration, and the
//! [`checkpoint::CheckpointStore`] seam through which crash recovery reads
//! persisted agent state.

pub mod checkpoint;
pub mod config;
pub mod types;
