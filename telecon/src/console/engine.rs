//! Ingestion engine
//!
//! Owns the event log, property cache, command history, the link, and
//! every open plot view. All mutation happens through `&mut Engine`, so
//! applying one inbound line (log append, cache update, refresh of every
//! view) is never observed half done.

use super::sink::{DurableStore, PersistenceError, RawSink, StoreRecord, ViewObserver};
use super::store::FileStore;
use super::subscription::{SubscriptionManager, ViewHandle};
use super::ConsoleError;
use crate::config::ConsoleConfig;
use crate::data::{export, Backfill, CommandHistory, EventLog, PropertyCache, SubscriberCursor};
use crate::link::proto::{Frame, ProtocolError};
use crate::link::{Connection, ConnectionError, Inbound, LinkState, SendError};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// What happened to one inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Ack { index: usize },
    PropertyChange { index: usize, property: String },
    /// Not a frame; only the raw sink saw it.
    Dropped(ProtocolError),
}

#[derive(Debug)]
pub struct IngestReport {
    pub outcome: Ingested,
    /// Set when the durable store rejected the record. In-memory state was
    /// updated regardless.
    pub persistence: Option<PersistenceError>,
    /// Views refreshed for this line.
    pub refreshed: usize,
}

impl IngestReport {
    fn dropped(err: ProtocolError) -> IngestReport {
        IngestReport {
            outcome: Ingested::Dropped(err),
            persistence: None,
            refreshed: 0,
        }
    }

    pub fn is_frame(&self) -> bool {
        !matches!(self.outcome, Ingested::Dropped(_))
    }
}

pub struct Engine {
    log: EventLog,
    cache: PropertyCache,
    history: CommandHistory,
    connection: Connection,
    views: SubscriptionManager,
    backfill: Backfill,
    store: Option<Box<dyn DurableStore>>,
    raw: Option<Box<dyn RawSink>>,
    observer: Option<Box<dyn ViewObserver>>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(Connection::default(), CommandHistory::default())
    }
}

impl Engine {
    pub fn new(connection: Connection, history: CommandHistory) -> Engine {
        Engine {
            log: EventLog::new(),
            cache: PropertyCache::new(),
            history,
            connection,
            views: SubscriptionManager::new(),
            backfill: Backfill::default(),
            store: None,
            raw: None,
            observer: None,
        }
    }

    /// Builds an engine from configuration: timeout, history capacity and
    /// seed, backfill policy, and the durable store if a path is set.
    pub fn from_config(config: &ConsoleConfig) -> Result<Engine, ConsoleError> {
        let mut history = CommandHistory::with_capacity(config.history_capacity);
        for command in &config.history_seed {
            history.insert(command);
        }
        let mut engine = Engine::new(Connection::new(config.connect_timeout()), history);
        engine.backfill = config.backfill;
        if let Some(path) = &config.store_path {
            engine.store = Some(Box::new(FileStore::open(path)?));
        }
        Ok(engine)
    }

    pub fn with_store<S: DurableStore + 'static>(mut self, store: S) -> Engine {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_raw_sink<R: RawSink + 'static>(mut self, raw: R) -> Engine {
        self.raw = Some(Box::new(raw));
        self
    }

    pub fn with_observer<O: ViewObserver + 'static>(mut self, observer: O) -> Engine {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn with_backfill(mut self, backfill: Backfill) -> Engine {
        self.backfill = backfill;
        self
    }

    pub fn state(&self) -> LinkState {
        self.connection.state()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.connection.peer()
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<SocketAddr, ConnectionError> {
        self.connection.connect(host, port)
    }

    pub fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.connection.disconnect()
    }

    /// Sends a command. On success the command enters the history and the
    /// recall cursor is reset; on failure nothing changes.
    pub fn send(&mut self, command: &str) -> Result<String, SendError> {
        if !self.connection.is_connected() {
            return Err(SendError::Disconnected);
        }
        let line = self.connection.send(command)?;
        self.history.insert(command);
        self.history.reset_cursor();
        if let Some(raw) = self.raw.as_mut() {
            raw.outbound(&line);
        }
        debug!("sent {:?}", line);
        Ok(line)
    }

    /// Applies one inbound line.
    pub fn ingest_line(&mut self, line: &str) -> IngestReport {
        if let Some(raw) = self.raw.as_mut() {
            raw.inbound(line);
        }

        let frame = match Frame::parse(line) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("dropped line {:?}: {}", line, err);
                return IngestReport::dropped(err);
            }
        };

        let mut persistence = None;
        let outcome = match (frame.property(), frame.raw_value()) {
            (Some(property), Some(value)) => {
                if self.cache.upsert(property, value) {
                    debug!("new property {}", property);
                }
                if let (Some(store), Some(record)) =
                    (self.store.as_mut(), StoreRecord::from_frame(&frame))
                {
                    if let Err(err) = store.append(&record) {
                        warn!("could not persist {}: {}", property, err);
                        persistence = Some(err);
                    }
                }
                let property = property.to_string();
                Ingested::PropertyChange {
                    index: self.log.append(frame),
                    property,
                }
            }
            _ => Ingested::Ack {
                index: self.log.append(frame),
            },
        };

        let refreshed = match self.observer.as_mut() {
            Some(observer) => self.views.broadcast(&self.log, Some(observer.as_mut())),
            None => self.views.broadcast(&self.log, None),
        };

        IngestReport {
            outcome,
            persistence,
            refreshed,
        }
    }

    /// Waits up to `timeout` for inbound data, then ingests everything
    /// already available. A lost link is returned as an error after the
    /// lines received before it were ingested.
    pub fn pump(&mut self, timeout: Duration) -> Result<Vec<IngestReport>, ConnectionError> {
        let mut reports = Vec::new();
        let mut next = self.connection.recv_timeout(timeout);
        loop {
            match next {
                Ok(Some(Inbound::Line(line))) => reports.push(self.ingest_line(&line)),
                Ok(Some(Inbound::Garbled(err))) => {
                    debug!("garbled input: {}", err);
                    reports.push(IngestReport::dropped(err));
                }
                Ok(None) => break,
                Err(err) => {
                    info!("{} lines ingested before the link went down", reports.len());
                    return Err(err);
                }
            }
            next = self.connection.try_recv();
        }
        Ok(reports)
    }

    pub fn open_view<I, S>(&mut self, targets: I) -> ViewHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cursor = SubscriberCursor::with_backfill(targets, &self.log, self.backfill);
        let handle = self.views.subscribe(cursor);
        debug!("opened {}", handle);
        handle
    }

    pub fn close_view(&mut self, handle: ViewHandle) -> Result<(), ConsoleError> {
        self.views
            .unsubscribe(handle)
            .map(|_| debug!("closed {}", handle))
            .ok_or(ConsoleError::UnknownView(handle))
    }

    /// Adds a plotted property; rescans the whole log. Returns false if the
    /// view already plotted it.
    pub fn add_view_target(&mut self, handle: ViewHandle, property: &str) -> Result<bool, ConsoleError> {
        let cursor = self
            .views
            .get_mut(handle)
            .ok_or(ConsoleError::UnknownView(handle))?;
        Ok(cursor.add_target(property, &self.log))
    }

    pub fn remove_view_target(
        &mut self,
        handle: ViewHandle,
        property: &str,
    ) -> Result<bool, ConsoleError> {
        let cursor = self
            .views
            .get_mut(handle)
            .ok_or(ConsoleError::UnknownView(handle))?;
        Ok(cursor.remove_target(property))
    }

    pub fn view(&self, handle: ViewHandle) -> Option<&SubscriberCursor> {
        self.views.get(handle)
    }

    pub fn views(&self) -> &SubscriptionManager {
        &self.views
    }

    pub fn properties(&self) -> &PropertyCache {
        &self.cache
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn history_up(&mut self) -> Option<String> {
        self.history.cycle_up().map(str::to_string)
    }

    pub fn history_down(&mut self) -> Option<String> {
        self.history.cycle_down().map(str::to_string)
    }

    pub fn export_log<P: AsRef<Path>>(&self, path: P) -> Result<usize, ConsoleError> {
        Ok(export::export_event_log(&self.log, path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_while_disconnected_changes_nothing() {
        let mut engine = Engine::default();
        assert!(matches!(engine.send("get x"), Err(SendError::Disconnected)));
        assert!(engine.history().is_empty());
        assert_eq!(engine.state(), LinkState::Disconnected);
    }

    #[test]
    fn ingest_outcomes() {
        let mut engine = Engine::default();
        let report = engine.ingest_line("2024-Jan-01 10:00:00 1 note de1.temp 23.5/C");
        assert_eq!(
            report.outcome,
            Ingested::PropertyChange {
                index: 0,
                property: "de1.temp".to_string()
            }
        );
        let report = engine.ingest_line("2024-Jan-01 10:00:01 2 ACK");
        assert_eq!(report.outcome, Ingested::Ack { index: 1 });
        let report = engine.ingest_line("Succesfully Connected to Host \r\n");
        assert_eq!(
            report.outcome,
            Ingested::Dropped(ProtocolError::TokenCount(5))
        );
        assert!(!report.is_frame());
        assert_eq!(engine.log().len(), 2);
    }

    #[test]
    fn unknown_view() {
        let mut engine = Engine::default();
        let handle = engine.open_view(["a"]);
        engine.close_view(handle).unwrap();
        assert!(matches!(
            engine.close_view(handle),
            Err(ConsoleError::UnknownView(h)) if h == handle
        ));
        assert!(engine.add_view_target(handle, "b").is_err());
        assert!(engine.view(handle).is_none());
    }

    #[test]
    fn config_seeds_history() {
        let config = ConsoleConfig {
            history_capacity: 2,
            history_seed: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        let engine = Engine::from_config(&config).unwrap();
        assert_eq!(engine.history().iter().collect::<Vec<_>>(), ["c", "b"]);
    }
}
