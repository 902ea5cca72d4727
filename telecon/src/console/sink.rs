//! Collaborators fed by the engine.
//!
//! The engine owns all state; these traits are the only way data leaves
//! it while ingesting. None of them can fail the ingestion step.

use crate::console::subscription::ViewHandle;
use crate::data::{export, SubscriberCursor};
use crate::link::proto::Frame;
use crossbeam::channel::{Sender, TrySendError};
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("could not open store {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("store append failed: {0}")]
    Append(#[from] io::Error),
}

/// One durable-store row, written for every accepted property change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRecord {
    pub timestamp: String,
    pub sequence: String,
    pub note: String,
    pub property: String,
    pub value: String,
}

impl StoreRecord {
    /// `None` for acknowledgements, which are not persisted.
    pub fn from_frame(frame: &Frame) -> Option<StoreRecord> {
        Some(StoreRecord {
            timestamp: format!("{} {}", frame.date(), frame.time()),
            sequence: frame.sequence().to_string(),
            note: frame.note()?.to_string(),
            property: frame.property()?.to_string(),
            value: frame.raw_value()?.to_string(),
        })
    }
}

pub trait DurableStore {
    /// Called once per accepted property change. Never retried.
    fn append(&mut self, record: &StoreRecord) -> Result<(), PersistenceError>;
}

/// Receives every inbound line and every outbound command line verbatim.
pub trait RawSink {
    fn inbound(&mut self, line: &str);
    fn outbound(&mut self, line: &str);
}

pub trait ViewObserver {
    /// Called once per view after each accepted frame.
    fn refresh(&mut self, handle: ViewHandle, cursor: &SubscriberCursor);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// In-memory console transcript.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    lines: Vec<(Direction, String)>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[(Direction, String)] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<usize> {
        export::write_transcript(
            self.lines
                .iter()
                .map(|(dir, line)| (*dir == Direction::Outbound, line.as_str())),
            out,
        )
    }

    pub fn export<P: AsRef<Path>>(&self, path: P) -> io::Result<usize> {
        let mut out = BufWriter::new(File::create(path)?);
        let n = self.write_to(&mut out)?;
        out.flush()?;
        Ok(n)
    }
}

impl RawSink for Transcript {
    fn inbound(&mut self, line: &str) {
        self.lines.push((Direction::Inbound, line.to_string()));
    }

    fn outbound(&mut self, line: &str) {
        self.lines.push((Direction::Outbound, line.to_string()));
    }
}

/// Forwards raw lines to a channel, dropping them when it is full.
impl RawSink for Sender<(Direction, String)> {
    fn inbound(&mut self, line: &str) {
        forward(self, Direction::Inbound, line);
    }

    fn outbound(&mut self, line: &str) {
        forward(self, Direction::Outbound, line);
    }
}

fn forward(tx: &Sender<(Direction, String)>, dir: Direction, line: &str) {
    match tx.try_send((dir, line.to_string())) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("raw console full, dropped {:?}", line),
        Err(TrySendError::Disconnected(_)) => debug!("raw console closed, dropped {:?}", line),
    }
}
