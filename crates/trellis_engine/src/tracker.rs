//! The evaluation stack.
//!
//! Each unit being evaluated (and each tracked view computation) has a frame
//! collecting the keys it reads. Frames also carry the trigger chain of the
//! running reaction, which is how re-entry is detected.

use std::collections::HashSet;

use trellis_foundation::Stamp;
use trellis_storage::{Dependency, UnitId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Reaction,
    Selector,
    View,
}

#[derive(Debug)]
pub(crate) struct Frame {
    pub unit: Option<UnitId>,
    pub kind: FrameKind,
    /// Reactions that led to this one, ending with this one.
    pub chain: Vec<UnitId>,
    pub reads: Vec<(Dependency, Stamp)>,
    seen: HashSet<Dependency>,
}

impl Frame {
    pub(crate) fn reaction(unit: UnitId, mut path: Vec<UnitId>) -> Self {
        path.push(unit);
        Self::new(Some(unit), FrameKind::Reaction, path)
    }

    pub(crate) fn selector(unit: UnitId) -> Self {
        Self::new(Some(unit), FrameKind::Selector, Vec::new())
    }

    pub(crate) fn view() -> Self {
        Self::new(None, FrameKind::View, Vec::new())
    }

    fn new(unit: Option<UnitId>, kind: FrameKind, chain: Vec<UnitId>) -> Self {
        Self {
            unit,
            kind,
            chain,
            reads: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub(crate) fn has_read(&self, dep: &Dependency) -> bool {
        self.seen.contains(dep)
    }
}

/// Stack of frames for the units currently evaluating.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    frames: Vec<Frame>,
}

impl Tracker {
    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub(crate) fn is_tracking(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Records a read in the innermost frame. Only the first read of a key
    /// keeps its stamp.
    pub(crate) fn record(&mut self, dep: Dependency, stamp: Stamp) {
        if let Some(frame) = self.frames.last_mut() {
            if frame.seen.insert(dep.clone()) {
                frame.reads.push((dep, stamp));
            }
        }
    }

    /// Trigger chain of the innermost running reaction.
    pub(crate) fn reaction_chain(&self) -> Vec<UnitId> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.kind == FrameKind::Reaction)
            .map(|f| f.chain.clone())
            .unwrap_or_default()
    }

    pub(crate) fn in_selector(&self) -> bool {
        self.frames.iter().any(|f| f.kind == FrameKind::Selector)
    }

    /// Units from the frame evaluating `unit` to the top of the stack.
    pub(crate) fn stack_from(&self, unit: UnitId) -> Option<Vec<UnitId>> {
        let pos = self.frames.iter().position(|f| f.unit == Some(unit))?;
        Some(self.frames[pos..].iter().filter_map(|f| f.unit).collect())
    }

    /// Running reactions that already read `dep`.
    pub(crate) fn running_readers(&self, dep: &Dependency) -> Vec<UnitId> {
        self.frames
            .iter()
            .filter(|f| f.kind == FrameKind::Reaction && f.has_read(dep))
            .filter_map(|f| f.unit)
            .collect()
    }
}
