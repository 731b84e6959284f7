//! Shared configuration and logging for the acquisition client
//!
//! This crate holds the pieces both the library surface and any tooling
//! built on top of it need: the immutable [`StreamConfig`] session
//! configuration and the tracing subscriber setup.

pub mod config;
pub mod logging;

pub use config::{DEFAULT_PID, DEFAULT_VID, StreamConfig, WatchdogConfig};
pub use logging::setup_logging;
