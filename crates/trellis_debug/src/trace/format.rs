//! Trace output formatting.

use trellis_engine::TraceEvent;

use super::record::TraceRecord;

// =============================================================================
// Trace Formatter Trait
// =============================================================================

/// Trait for formatting trace records.
pub trait TraceFormatter {
    /// Formats a single trace record to a string.
    fn format(&self, record: &TraceRecord) -> String;

    /// Formats multiple records, one per line.
    fn format_many(&self, records: &[&TraceRecord]) -> String {
        records
            .iter()
            .map(|r| self.format(r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// Human-Readable Formatter
// =============================================================================

/// Formats trace records in human-readable form, one line each.
#[derive(Clone, Debug, Default)]
pub struct HumanFormatter {
    /// Whether to include record IDs.
    pub show_ids: bool,
}

impl HumanFormatter {
    /// Creates a new human formatter with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to show record IDs.
    #[must_use]
    pub fn with_ids(mut self) -> Self {
        self.show_ids = true;
        self
    }

    fn event_line(event: &TraceEvent) -> String {
        match event {
            TraceEvent::ActionStarted { action, name } => match name {
                Some(name) => format!("=== ACTION {action} ({name}) START ==="),
                None => format!("=== ACTION {action} START ==="),
            },
            TraceEvent::ActionCommitted { action, reactions } => {
                format!("=== ACTION {action} COMMIT ({reactions} reaction runs) ===")
            }
            TraceEvent::ActionRolledBack { action, error } => {
                format!("=== ACTION {action} ROLLBACK: {error} ===")
            }
            TraceEvent::EntityAdded { entity } => format!("  ADD {entity}"),
            TraceEvent::EntityRemoved { entity } => format!("  REMOVE {entity}"),
            TraceEvent::PropertyWritten { entity, field, old, new } => {
                format!("    WRITE {entity}.{field} {old} -> {new}")
            }
            TraceEvent::ReactionScheduled { reaction } => format!("  SCHEDULE {reaction}"),
            TraceEvent::ReactionRun { reaction, reads } => format!("  RUN {reaction} ({reads} reads)"),
            TraceEvent::ReactionSkipped { reaction } => format!("  SKIP {reaction}"),
            TraceEvent::SelectorComputed { selector, changed } => {
                let status = if *changed { "changed" } else { "unchanged" };
                format!("    COMPUTE {selector} ({status})")
            }
            TraceEvent::SelectorReused { selector } => format!("    REUSE {selector}"),
            TraceEvent::IndexSynthesized { collection, spec } => {
                format!("  INDEX {collection} [{spec}]")
            }
            TraceEvent::Invalidated { dependency, units } => {
                format!("    INVALIDATE {dependency} ({units} readers)")
            }
            TraceEvent::Notified {
                action,
                subscribers,
                watches,
            } => format!("  NOTIFY #{action} ({subscribers} subscribers, {watches} watches)"),
        }
    }
}

impl TraceFormatter for HumanFormatter {
    fn format(&self, record: &TraceRecord) -> String {
        let line = Self::event_line(&record.event);
        if self.show_ids {
            format!("[{:06}] A{:04} {line}", record.id, record.action)
        } else {
            format!("A{:04} {line}", record.action)
        }
    }
}
