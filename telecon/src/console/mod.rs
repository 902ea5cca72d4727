//! Console
//!
//! The ingestion engine and the collaborators it feeds.

mod engine;
mod sink;
mod store;
mod subscription;

pub use engine::{Engine, IngestReport, Ingested};
pub use sink::{
    Direction, DurableStore, PersistenceError, RawSink, StoreRecord, Transcript, ViewObserver,
};
pub use store::FileStore;
pub use subscription::{SubscriptionManager, ViewHandle};

use crate::config::ConfigError;
use crate::data::CatalogError;
use crate::link::{ConnectionError, ProtocolError, SendError};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("could not send: {0}")]
    Send(#[from] SendError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("command catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("no open view {0}")]
    UnknownView(ViewHandle),
    #[error("export failed: {0}")]
    IO(#[from] io::Error),
}
