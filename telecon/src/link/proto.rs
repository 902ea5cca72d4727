//! Wire protocol
//!
//! The instrument speaks a line-oriented, space-separated ASCII protocol.
//! Inbound lines are one of:
//! - `<date> <time> <seq> <keyword>`: acknowledgement of a command.
//! - `<date> <time> <seq> <note> <property> <value>[/<unit>]`: a property
//!   changed on the instrument.
//!
//! Outbound commands are the command text followed by a space and a newline.

use chrono::NaiveDateTime;
use std::fmt;
use thiserror::Error;

/// Format of the joined `<date>-<time>` timestamp, e.g. `2024-Jan-01-10:00:00`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%b-%d-%H:%M:%S";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("line has {0} tokens, expected 4 or 6")]
    TokenCount(usize),
    #[error("line exceeds {0} bytes without a terminator")]
    LineTooLong(usize),
    #[error("line is not valid UTF-8")]
    Encoding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Ack {
        keyword: String,
    },
    PropertyChange {
        note: String,
        property: String,
        raw_value: String,
    },
}

/// One structured unit of inbound telemetry. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    date: String,
    time: String,
    sequence: String,
    kind: FrameKind,
}

impl Frame {
    /// Tokenizes one raw line. Line terminators are stripped, then the line
    /// is split on single spaces, so consecutive spaces yield empty tokens.
    pub fn parse(line: &str) -> Result<Frame, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let tokens: Vec<&str> = line.split(' ').collect();
        match tokens[..] {
            [date, time, seq, keyword] => Ok(Frame {
                date: date.to_string(),
                time: time.to_string(),
                sequence: seq.to_string(),
                kind: FrameKind::Ack {
                    keyword: keyword.to_string(),
                },
            }),
            [date, time, seq, note, property, value] => Ok(Frame {
                date: date.to_string(),
                time: time.to_string(),
                sequence: seq.to_string(),
                kind: FrameKind::PropertyChange {
                    note: note.to_string(),
                    property: property.to_string(),
                    raw_value: value.to_string(),
                },
            }),
            _ => Err(ProtocolError::TokenCount(tokens.len())),
        }
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    /// Sequence token as a number, if it is one.
    pub fn sequence_number(&self) -> Option<u64> {
        self.sequence.parse().ok()
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind, FrameKind::Ack { .. })
    }

    pub fn property(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::PropertyChange { property, .. } => Some(property),
            FrameKind::Ack { .. } => None,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::PropertyChange { note, .. } => Some(note),
            FrameKind::Ack { .. } => None,
        }
    }

    /// The value expression exactly as received, unit included.
    pub fn raw_value(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::PropertyChange { raw_value, .. } => Some(raw_value),
            FrameKind::Ack { .. } => None,
        }
    }

    /// Numeric part of the value expression (before the first `/`).
    pub fn value(&self) -> Option<f64> {
        let raw = self.raw_value()?;
        let number = raw.split('/').next().unwrap_or(raw);
        number.trim().parse().ok()
    }

    /// Unit part of the value expression (after the first `/`).
    pub fn unit(&self) -> Option<&str> {
        self.raw_value()?.split_once('/').map(|(_, unit)| unit)
    }

    /// Timestamp assembled from the date and time tokens.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.date, &self.time)
    }

    /// Seconds since the Unix epoch, timestamps taken as UTC.
    pub fn time_key(&self) -> Option<f64> {
        self.timestamp().map(|ts| ts.and_utc().timestamp() as f64)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.date, self.time, self.sequence)?;
        match &self.kind {
            FrameKind::Ack { keyword } => write!(f, " {}", keyword),
            FrameKind::PropertyChange {
                note,
                property,
                raw_value,
            } => write!(f, " {} {} {}", note, property, raw_value),
        }
    }
}

pub fn parse_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&format!("{}-{}", date, time), TIMESTAMP_FORMAT).ok()
}

/// Serializes a command for the wire: the text, a space, and a newline.
pub fn encode_command(command: &str) -> String {
    format!("{} \n", command)
}
