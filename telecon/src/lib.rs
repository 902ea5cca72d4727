pub mod config;
pub mod console;
pub mod data;
pub mod link;

pub use config::ConsoleConfig;
pub use console::{ConsoleError, Engine};
pub use link::proto::Frame;
