//! Tracing for Trellis stores.
//!
//! A [`Tracer`] is installed as the store's debug listener and records every
//! [`TraceEvent`] into a bounded [`TraceBuffer`], tagged with the action it
//! was emitted in. Records can be echoed to stderr as they arrive.
//!
//! # Example
//!
//! ```text
//! let tracer = Tracer::new(DebugConfig::enabled());
//! let store = Store::new(config.with_debug_listener(tracer.listener()))?;
//! store.action(|s| ...)?;
//! println!("{}", tracer.format_recent(20));
//! ```

pub mod buffer;
pub mod format;
pub mod record;

pub use buffer::{TraceBuffer, TraceBufferStats};
pub use format::{HumanFormatter, TraceFormatter};
pub use record::TraceRecord;

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use trellis_engine::TraceEvent;

use crate::config::DebugConfig;

// =============================================================================
// Tracer
// =============================================================================

#[derive(Debug)]
struct TracerState {
    config: DebugConfig,
    buffer: TraceBuffer,
    current_action: u64,
}

/// Records the trace events of a store.
///
/// Clones share the same buffer, so one clone can be handed to the store as
/// its listener while another is kept for inspection.
#[derive(Clone, Debug)]
pub struct Tracer {
    state: Rc<RefCell<TracerState>>,
    formatter: HumanFormatter,
}

impl Tracer {
    /// Creates a new tracer with the given configuration.
    #[must_use]
    pub fn new(config: DebugConfig) -> Self {
        let buffer = TraceBuffer::new(config.buffer_size);
        Self {
            state: Rc::new(RefCell::new(TracerState {
                config,
                buffer,
                current_action: 0,
            })),
            formatter: HumanFormatter::new(),
        }
    }

    /// Creates a tracer that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(DebugConfig::default())
    }

    /// Returns whether tracing is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.borrow().config.enabled
    }

    /// Enables tracing.
    pub fn enable(&self) {
        self.state.borrow_mut().config.enabled = true;
    }

    /// Disables tracing.
    pub fn disable(&self) {
        self.state.borrow_mut().config.enabled = false;
    }

    /// Returns a closure suitable for `StoreConfig::with_debug_listener`.
    #[must_use]
    pub fn listener(&self) -> impl Fn(&TraceEvent) + 'static {
        let tracer = self.clone();
        move |event| tracer.record(event)
    }

    /// Records a trace event.
    pub fn record(&self, event: &TraceEvent) {
        let mut state = self.state.borrow_mut();
        if let TraceEvent::ActionStarted { action, .. } = event {
            state.current_action = *action;
        }
        if !state.config.keeps(event.kind()) {
            return;
        }
        let action = state.current_action;
        state.buffer.push(action, event.clone());
        if state.config.trace_to_stderr {
            if let Some(record) = state.buffer.recent(1).first() {
                let _ = writeln!(io::stderr(), "{}", self.formatter.format(record));
            }
        }
    }

    /// Returns a copy of every record in the buffer, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<TraceRecord> {
        self.state.borrow().buffer.iter().cloned().collect()
    }

    /// Returns the records of one action.
    #[must_use]
    pub fn records_for_action(&self, action: u64) -> Vec<TraceRecord> {
        self.state
            .borrow()
            .buffer
            .records_for_action(action)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Formats the most recent `count` records, one per line.
    #[must_use]
    pub fn format_recent(&self, count: usize) -> String {
        let state = self.state.borrow();
        self.formatter.format_many(&state.buffer.recent(count))
    }

    /// Clears the trace buffer.
    pub fn clear(&self) {
        self.state.borrow_mut().buffer.clear();
    }

    /// Returns buffer statistics.
    #[must_use]
    pub fn stats(&self) -> TraceBufferStats {
        self.state.borrow().buffer.stats()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::disabled()
    }
}
