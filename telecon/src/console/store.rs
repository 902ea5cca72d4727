//! File-backed durable store.
//!
//! Appends one tab-separated row per property change:
//! `timestamp  sequence  note  property  value`. The file is opened in
//! append mode so earlier sessions are kept.

use super::sink::{DurableStore, PersistenceError, StoreRecord};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct FileStore {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u64,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileStore, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PersistenceError::Open {
                path: path.clone(),
                source,
            })?;
        debug!("durable store at {}", path.display());
        Ok(FileStore {
            path,
            out: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended by this handle.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl DurableStore for FileStore {
    fn append(&mut self, record: &StoreRecord) -> Result<(), PersistenceError> {
        writeln!(
            self.out,
            "{}\t{}\t{}\t{}\t{}",
            record.timestamp, record.sequence, record.note, record.property, record.value
        )?;
        self.out.flush()?;
        self.rows += 1;
        Ok(())
    }
}
