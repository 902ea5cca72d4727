pub mod connection;
pub mod port;
pub mod proto;

pub use connection::{Connection, ConnectionError, Inbound, LinkState};
pub use port::{RecvError, SendError};
pub use proto::{Frame, FrameKind, ProtocolError};
