//! Tracing and change-log formatting for Trellis.
//!
//! This crate provides:
//! - [`Tracer`] - Records a store's trace events into a ring buffer
//! - [`TraceBuffer`] - Bounded history of trace records per action
//! - [`HumanFormatter`] - One line per trace event
//! - [`ChangeLog`] - One line per committed action
//! - [`DebugConfig`] - Tracing configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod summary;
pub mod trace;

pub use config::DebugConfig;
pub use summary::ChangeLog;
pub use trace::{HumanFormatter, TraceBuffer, TraceBufferStats, TraceFormatter, TraceRecord, Tracer};
