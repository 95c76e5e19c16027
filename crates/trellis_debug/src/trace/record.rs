//! Trace records.

use trellis_engine::TraceEvent;

/// A trace event stamped with its position and the action it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceRecord {
    /// Monotonic record id.
    pub id: u64,
    /// Action number the event was emitted in (0 while the store is built).
    pub action: u64,
    /// The event.
    pub event: TraceEvent,
}

impl TraceRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(id: u64, action: u64, event: TraceEvent) -> Self {
        Self { id, action, event }
    }

    /// Returns the event kind, e.g. `"reaction-run"`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.event.kind()
    }
}
