mod cache;
mod catalog;
mod cursor;
mod event_log;
pub mod export;
mod history;

pub use cache::PropertyCache;
pub use catalog::{CatalogEntry, CatalogError, CatalogGroup, CommandCatalog};
pub use cursor::{Backfill, Point, SubscriberCursor};
pub use event_log::EventLog;
pub use history::{CommandHistory, DEFAULT_HISTORY_CAPACITY};
