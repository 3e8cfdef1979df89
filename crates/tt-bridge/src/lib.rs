//! Bridge -- the seam between orchestration and the outside world.
//!
//! - [`protocol`]: the typed event stream (`tool.call`, `agent.phase`, ...)
//! - [`event_bus`]: multiplexed publish/subscribe over flume channels
//! - [`tool_bridge`]: dispatches tool calls to wherever tools actually run and
//!   guarantees a `tool.result` for every `tool.call` it emits

pub mod event_bus;
pub mod protocol;
pub mod tool_bridge;
