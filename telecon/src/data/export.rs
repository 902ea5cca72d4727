//! Text exports
//!
//! The event log is written one frame per line, tokens joined by single
//! spaces as received. Exports only read in-memory state.

use super::EventLog;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Prefix marking outbound commands in a console transcript.
pub const OUTBOUND_PREFIX: &str = "Sending -> ";

pub fn write_event_log<W: Write>(log: &EventLog, out: &mut W) -> io::Result<usize> {
    for frame in log {
        writeln!(out, "{}", frame)?;
    }
    Ok(log.len())
}

/// Writes the event log to `path`, replacing any existing file. Returns
/// the number of frames written.
pub fn export_event_log<P: AsRef<Path>>(log: &EventLog, path: P) -> io::Result<usize> {
    let mut out = BufWriter::new(File::create(path)?);
    let n = write_event_log(log, &mut out)?;
    out.flush()?;
    Ok(n)
}

/// Writes transcript lines, outbound ones prefixed, with a newline after
/// each line that does not already end in one.
pub fn write_transcript<'a, W, I>(lines: I, out: &mut W) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = (bool, &'a str)>,
{
    let mut n = 0;
    for (outbound, line) in lines {
        if outbound {
            out.write_all(OUTBOUND_PREFIX.as_bytes())?;
        }
        out.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            out.write_all(b"\n")?;
        }
        n += 1;
    }
    Ok(n)
}
