//! Harness -- the tool capability layer of the tether runtime.
//!
//! A [`registry::ToolRegistry`] maps tool names to [`registry::Capability`]
//! implementations. The registry is populated at startup and read
//! concurrently by every in-flight tool call; concrete tools (file access,
//! search, terminal) live outside this workspace and plug in through the
//! `Capability` trait.

pub mod registry;
