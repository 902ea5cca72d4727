//! Property cache
//!
//! Latest raw value per property name, in the order properties were first
//! seen. Names are compared case-sensitively.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct PropertyCache {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` as the latest value of `property`. A new property is
    /// appended; a known one is overwritten where it stands. Returns true
    /// when the property was not known before.
    pub fn upsert(&mut self, property: &str, value: &str) -> bool {
        match self.index.get(property) {
            Some(&pos) => {
                self.entries[pos].1 = value.to_string();
                false
            }
            None => {
                self.index.insert(property.to_string(), self.entries.len());
                self.entries.push((property.to_string(), value.to_string()));
                true
            }
        }
    }

    pub fn exists(&self, property: &str) -> bool {
        self.index.contains_key(property)
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.index
            .get(property)
            .map(|&pos| self.entries[pos].1.as_str())
    }

    /// `(property, value)` pairs in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), v.as_str()))
    }

    /// Property names in first-seen order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
