//! One-line rendering of committed actions.
//!
//! ```text
//! #3 rename: +Users#u4 -Jobs#j2 ~Users#u1{jobs,name}
//! ```

use std::cell::RefCell;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::rc::Rc;

use trellis_engine::ChangeSummary;
use trellis_foundation::EntityRef;

/// Keeps the rendered summary of every committed action.
///
/// Clones share the same log, so one clone can be installed as the store's
/// transaction listener while another is read.
#[derive(Clone, Debug, Default)]
pub struct ChangeLog {
    lines: Rc<RefCell<Vec<String>>>,
    echo: bool,
}

impl ChangeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to echo each line to stderr.
    #[must_use]
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Renders one summary.
    ///
    /// Entities are listed added first, then removed, then changed with their
    /// sorted member names. An action that changed nothing renders as
    /// `(no changes)`.
    #[must_use]
    pub fn render(summary: &ChangeSummary) -> String {
        let mut line = format!("#{}", summary.action);
        if let Some(name) = &summary.name {
            let _ = write!(line, " {name}");
        }
        line.push(':');
        if summary.is_empty() {
            line.push_str(" (no changes)");
            return line;
        }
        push_entities(&mut line, '+', &summary.added);
        push_entities(&mut line, '-', &summary.removed);
        for change in &summary.changed {
            let _ = write!(line, " ~{}{{{}}}", change.entity, change.properties.join(","));
        }
        line
    }

    /// Appends the rendering of `summary`.
    pub fn record(&self, summary: &ChangeSummary) {
        let line = Self::render(summary);
        if self.echo {
            let _ = writeln!(io::stderr(), "{line}");
        }
        self.lines.borrow_mut().push(line);
    }

    /// Returns a closure suitable for `StoreConfig::with_listener`.
    #[must_use]
    pub fn listener(&self) -> impl Fn(&ChangeSummary) + 'static {
        let log = self.clone();
        move |summary| log.record(summary)
    }

    /// Returns every line so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    /// Returns the most recent line.
    #[must_use]
    pub fn last(&self) -> Option<String> {
        self.lines.borrow().last().cloned()
    }

    /// Forgets every line.
    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}

fn push_entities(line: &mut String, sign: char, entities: &[EntityRef]) {
    for entity in entities {
        let _ = write!(line, " {sign}{entity}");
    }
}
