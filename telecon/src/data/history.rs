//! Command history
//!
//! Fixed-capacity list of distinct commands, newest first, with a recall
//! cursor for stepping through previous commands from the input line.
//!
//! Re-sending a command that is already stored leaves it where it is; it is
//! not moved to the front.

use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
    cursor: usize,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero capacity is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn contains(&self, command: &str) -> bool {
        self.entries.iter().any(|c| c == command)
    }

    /// Puts `command` in front, dropping the oldest entry when full.
    /// Returns false, without touching anything, if it is already stored.
    pub fn insert(&mut self, command: &str) -> bool {
        if self.contains(command) {
            return false;
        }
        self.entries.push_front(command.to_string());
        self.entries.truncate(self.capacity);
        true
    }

    /// Recall towards older commands. Returns the entry at the cursor, then
    /// advances unless the next slot is empty.
    pub fn cycle_up(&mut self) -> Option<&str> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        let shown = self.cursor;
        if self.cursor + 1 < self.entries.len() {
            self.cursor += 1;
        }
        self.entries.get(shown).map(String::as_str)
    }

    /// Recall towards newer commands. Steps back unless already at the
    /// newest entry, then returns the entry at the cursor.
    pub fn cycle_down(&mut self) -> Option<&str> {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        self.entries.get(self.cursor).map(String::as_str)
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
