//! Configuration for tracing.

/// Configuration for the debug tracer.
///
/// Controls whether events are kept, how many, and whether they are echoed.
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Whether tracing is enabled (false = events are dropped).
    pub enabled: bool,

    /// Ring buffer size (number of records to retain).
    pub buffer_size: usize,

    /// Echo each record to stderr as it arrives.
    pub trace_to_stderr: bool,

    /// Event kinds to keep (empty = all).
    pub event_filter: Vec<String>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_size: 10_000,
            trace_to_stderr: false,
            event_filter: Vec::new(),
        }
    }
}

impl DebugConfig {
    /// Creates a configuration with tracing enabled.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Creates a configuration for interactive debugging: enabled and echoed.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            buffer_size: 1_000,
            trace_to_stderr: true,
            event_filter: Vec::new(),
        }
    }

    /// Builder method to set enabled state.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder method to set buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Builder method to enable/disable stderr echo.
    #[must_use]
    pub fn with_trace_to_stderr(mut self, trace: bool) -> Self {
        self.trace_to_stderr = trace;
        self
    }

    /// Builder method to keep only some event kinds, e.g. `"reaction-run"`.
    #[must_use]
    pub fn filter_events<S: Into<String>>(mut self, kinds: impl IntoIterator<Item = S>) -> Self {
        self.event_filter = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if events of `kind` should be kept.
    #[must_use]
    pub fn keeps(&self, kind: &str) -> bool {
        self.enabled && (self.event_filter.is_empty() || self.event_filter.iter().any(|k| k == kind))
    }
}
