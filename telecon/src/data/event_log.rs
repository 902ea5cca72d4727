//! Event log
//!
//! Append-only, ordered record of every accepted frame. Arrival order is
//! the order lines came off the socket; nothing is ever reordered, removed
//! or edited in place, so an index handed out once stays valid.

use crate::link::proto::Frame;
use std::ops::Range;

#[derive(Debug, Default, Clone)]
pub struct EventLog {
    frames: Vec<Frame>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Appends a frame and returns its index.
    pub fn append(&mut self, frame: Frame) -> usize {
        self.frames.push(frame);
        self.frames.len() - 1
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn last(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    /// Frames in `range`, clamped to the current length.
    pub fn range(&self, range: Range<usize>) -> &[Frame] {
        let end = range.end.min(self.frames.len());
        let start = range.start.min(end);
        &self.frames[start..end]
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}
