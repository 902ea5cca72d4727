//! Console configuration
//!
//! Loaded from YAML; every field has a default so an empty file is valid.
//! A few settings can be overridden from the environment:
//! `TELECON_HOST`, `TELECON_PORT`, `TELECON_CONNECT_TIMEOUT_MS` and
//! `TELECON_HISTORY_CAPACITY`.

use crate::data::{Backfill, DEFAULT_HISTORY_CAPACITY};
use log::warn;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_HOST: &str = "TELECON_HOST";
pub const ENV_PORT: &str = "TELECON_PORT";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "TELECON_CONNECT_TIMEOUT_MS";
pub const ENV_HISTORY_CAPACITY: &str = "TELECON_HISTORY_CAPACITY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no {0} configured")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Candidate hosts, first one is the default.
    pub hosts: Vec<String>,
    /// Candidate ports, first one is the default.
    pub ports: Vec<u16>,
    pub connect_timeout_ms: u64,
    pub history_capacity: usize,
    /// Commands preloaded into the history, oldest first.
    pub history_seed: Vec<String>,
    pub backfill: Backfill,
    pub store_path: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            hosts: vec!["10.58.0.81".to_string(), "127.0.0.1".to_string()],
            ports: vec![1234, 1233, 8081],
            connect_timeout_ms: 100,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_seed: Vec::new(),
            backfill: Backfill::Full,
            store_path: None,
            catalog_path: None,
        }
    }
}

impl ConsoleConfig {
    pub fn from_yaml(text: &str) -> Result<ConsoleConfig, ConfigError> {
        // An empty document deserializes as null, not as an empty mapping.
        if text.trim().is_empty() {
            return Ok(ConsoleConfig::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<ConsoleConfig, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ConsoleConfig::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Applies the `TELECON_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Values that do not parse are
    /// ignored with a warning. A host or port override becomes the default
    /// choice and is kept once in the candidate list.
    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(host) = lookup(ENV_HOST) {
            self.set_default_host(host.trim());
        }
        if let Some(port) = parse_override(&lookup, ENV_PORT) {
            self.set_default_port(port);
        }
        if let Some(ms) = parse_override(&lookup, ENV_CONNECT_TIMEOUT_MS) {
            self.connect_timeout_ms = ms;
        }
        if let Some(capacity) = parse_override(&lookup, ENV_HISTORY_CAPACITY) {
            self.history_capacity = capacity;
        }
    }

    pub fn set_default_host(&mut self, host: &str) {
        self.hosts.retain(|h| h != host);
        self.hosts.insert(0, host.to_string());
    }

    pub fn set_default_port(&mut self, port: u16) {
        self.ports.retain(|p| *p != port);
        self.ports.insert(0, port);
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// First configured host and port.
    pub fn default_endpoint(&self) -> Result<(&str, u16), ConfigError> {
        let host = self.hosts.first().ok_or(ConfigError::Missing("host"))?;
        let port = self.ports.first().ok_or(ConfigError::Missing("port"))?;
        Ok((host, *port))
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = ConsoleConfig::default();
        assert_eq!(config.default_endpoint().unwrap(), ("10.58.0.81", 1234));
        assert_eq!(config.connect_timeout(), Duration::from_millis(100));
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.backfill, Backfill::Full);
        assert_eq!(ConsoleConfig::from_yaml("").unwrap(), config);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = ConsoleConfig::from_yaml(
            "ports: [9000]\nbackfill: skip-last\nhistory_seed: [get a, get b]\n",
        )
        .unwrap();
        assert_eq!(config.ports, [9000]);
        assert_eq!(config.backfill, Backfill::SkipLast);
        assert_eq!(config.history_seed, ["get a", "get b"]);
        assert_eq!(config.hosts[0], "10.58.0.81");
        assert!(config.store_path.is_none());
    }

    #[test]
    fn yaml_round_trip() {
        let mut config = ConsoleConfig::default();
        config.store_path = Some(PathBuf::from("/tmp/store.tsv"));
        let text = config.to_yaml().unwrap();
        assert_eq!(ConsoleConfig::from_yaml(&text).unwrap(), config);
    }

    #[test]
    fn bad_yaml() {
        assert!(matches!(
            ConsoleConfig::from_yaml("ports: lots"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_HOST, "127.0.0.1"),
            (ENV_PORT, "8081"),
            (ENV_CONNECT_TIMEOUT_MS, "250"),
            (ENV_HISTORY_CAPACITY, "many"),
        ]
        .into_iter()
        .collect();

        let mut config = ConsoleConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.hosts, ["127.0.0.1", "10.58.0.81"]);
        assert_eq!(config.ports, [8081, 1234, 1233]);
        assert_eq!(config.connect_timeout_ms, 250);
        // unparsable, left alone
        assert_eq!(config.history_capacity, 10);
    }

    #[test]
    fn missing_endpoint() {
        let config = ConsoleConfig {
            hosts: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.default_endpoint(),
            Err(ConfigError::Missing("host"))
        ));
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConsoleConfig::load(dir.path().join("none.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
