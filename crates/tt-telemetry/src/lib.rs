//! Logging setup for tether binaries.
//!
//! Library crates only emit `tracing` events; binaries call
//! [`logging::init_logging`] once at startup to install a subscriber in
//! either human-readable or JSON form.

pub mod logging;
