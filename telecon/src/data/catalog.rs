//! Command catalog
//!
//! Grouped list of known commands and what they do, used to fill the
//! input line. Catalog files are plain text:
//!
//! ```text
//! # comment
//! [Coils]
//! set coil0.cur | Drive coil 0
//! get coil0.cur
//! ```
//!
//! Entries that come before any `[Group]` heading land in `Commands`.

use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_GROUP: &str = "Commands";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
    #[error("could not read catalog: {0}")]
    IO(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub command: String,
    pub effect: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogGroup {
    pub name: String,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCatalog {
    groups: Vec<CatalogGroup>,
}

impl Default for CommandCatalog {
    fn default() -> Self {
        CommandCatalog {
            groups: vec![CatalogGroup {
                name: DEFAULT_GROUP.to_string(),
                entries: vec![CatalogEntry {
                    command: "get".to_string(),
                    effect: "Get the current value of Property".to_string(),
                }],
            }],
        }
    }
}

impl CommandCatalog {
    pub fn parse(text: &str) -> Result<CommandCatalog, CatalogError> {
        let mut groups: Vec<CatalogGroup> = Vec::new();
        let mut current: Option<usize> = None;

        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| CatalogError::Syntax {
                    line: n + 1,
                    reason: "unterminated group heading".to_string(),
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(CatalogError::Syntax {
                        line: n + 1,
                        reason: "empty group name".to_string(),
                    });
                }
                current = Some(group_index(&mut groups, name));
                continue;
            }

            let (command, effect) = match line.split_once('|') {
                Some((c, e)) => (c.trim(), e.trim()),
                None => (line, ""),
            };
            if command.is_empty() {
                return Err(CatalogError::Syntax {
                    line: n + 1,
                    reason: "entry has no command".to_string(),
                });
            }

            let idx = *current.get_or_insert_with(|| group_index(&mut groups, DEFAULT_GROUP));
            groups[idx].entries.push(CatalogEntry {
                command: command.to_string(),
                effect: effect.to_string(),
            });
        }

        Ok(CommandCatalog { groups })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<CommandCatalog, CatalogError> {
        let text = fs::read_to_string(path)?;
        CommandCatalog::parse(&text)
    }

    pub fn groups(&self) -> &[CatalogGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&CatalogGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// All entries, group by group.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.groups
            .iter()
            .flat_map(|g| g.entries.iter().map(move |e| (g.name.as_str(), e)))
    }

    pub fn find(&self, command: &str) -> Option<&CatalogEntry> {
        self.entries()
            .map(|(_, e)| e)
            .find(|e| e.command == command)
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Index of the group called `name`, appending it if new.
fn group_index(groups: &mut Vec<CatalogGroup>, name: &str) -> usize {
    match groups.iter().position(|g| g.name == name) {
        Some(idx) => idx,
        None => {
            groups.push(CatalogGroup {
                name: name.to_string(),
                entries: Vec::new(),
            });
            groups.len() - 1
        }
    }
}
