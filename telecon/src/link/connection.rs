//! Connection
//!
//! State machine for the single instrument link:
//! `Disconnected -> Connecting -> Connected -> Disconnected`.
//!
//! A connect is one blocking attempt bounded by a short timeout. There is
//! no retry loop, no heartbeat, and no automatic reconnect: a dropped link
//! is reported once and the connection returns to `Disconnected`.

use super::port::{self, Port, RecvError, SendError};
use super::proto;
use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::{info, warn};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        })
    }
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("already connected to {0}")]
    AlreadyConnected(SocketAddr),
    #[error("not connected to any host")]
    NotConnected,
    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },
    #[error("timed out connecting to {0}")]
    Timeout(SocketAddr),
    #[error("could not find the host {addr}: {source}")]
    Unreachable { addr: SocketAddr, source: io::Error },
    #[error("link to {addr} lost: {reason}")]
    Lost { addr: SocketAddr, reason: String },
}

/// What the link delivered.
#[derive(Debug)]
pub enum Inbound {
    /// A complete line, terminator stripped.
    Line(String),
    /// Bytes that could not be turned into a line; the link stays up.
    Garbled(proto::ProtocolError),
}

struct Link {
    port: Port,
    rx: Receiver<Result<String, RecvError>>,
}

pub struct Connection {
    state: LinkState,
    link: Option<Link>,
    timeout: Duration,
}

impl Default for Connection {
    fn default() -> Self {
        Connection::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connection {
    pub fn new(timeout: Duration) -> Connection {
        Connection {
            state: LinkState::Disconnected,
            link: None,
            timeout,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Address of the connected instrument.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.port.peer())
    }

    /// Makes one bounded connection attempt. Only valid while disconnected;
    /// on failure the state is `Disconnected` again.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<SocketAddr, ConnectionError> {
        if let Some(peer) = self.peer() {
            return Err(ConnectionError::AlreadyConnected(peer));
        }

        let addr = port::find_addr(host, port).map_err(|source| ConnectionError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?;

        self.state = LinkState::Connecting;
        info!("connecting to {} (timeout {:?})", addr, self.timeout);

        let (rx_send, rx) = Port::rx_channel();
        match Port::connect(&addr, self.timeout, Port::rx_to_channel(rx_send)) {
            Ok(port) => {
                let peer = port.peer();
                self.link = Some(Link { port, rx });
                self.state = LinkState::Connected;
                info!("connected to {}", peer);
                Ok(peer)
            }
            Err(source) => {
                self.state = LinkState::Disconnected;
                warn!("connection to {} failed: {}", addr, source);
                if source.kind() == io::ErrorKind::TimedOut {
                    Err(ConnectionError::Timeout(addr))
                } else {
                    Err(ConnectionError::Unreachable { addr, source })
                }
            }
        }
    }

    /// Tears down the link. Only valid while connected.
    pub fn disconnect(&mut self) -> Result<(), ConnectionError> {
        match self.link.take() {
            Some(link) => {
                info!("disconnected from {}", link.port.peer());
                self.state = LinkState::Disconnected;
                Ok(())
            }
            None => Err(ConnectionError::NotConnected),
        }
    }

    /// Queues a command followed by the wire terminator. Returns the exact
    /// line queued for the socket. Never waits: when the instrument stops
    /// reading and the queue fills up, this fails with `SendError::Full`.
    pub fn send(&mut self, command: &str) -> Result<String, SendError> {
        let link = self.link.as_ref().ok_or(SendError::Disconnected)?;
        let line = proto::encode_command(command);
        link.port.try_send(line.clone())?;
        Ok(line)
    }

    /// Returns the next inbound item if one is already available.
    pub fn try_recv(&mut self) -> Result<Option<Inbound>, ConnectionError> {
        let res = match &self.link {
            Some(link) => match link.rx.try_recv() {
                Ok(res) => res,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => Err(RecvError::Disconnected),
            },
            None => return Err(ConnectionError::NotConnected),
        };
        self.handle(res).map(Some)
    }

    /// Waits up to `timeout` for the next inbound item.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Inbound>, ConnectionError> {
        let res = match &self.link {
            Some(link) => match link.rx.recv_timeout(timeout) {
                Ok(res) => res,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(RecvError::Disconnected),
            },
            None => return Err(ConnectionError::NotConnected),
        };
        self.handle(res).map(Some)
    }

    fn handle(&mut self, res: Result<String, RecvError>) -> Result<Inbound, ConnectionError> {
        match res {
            Ok(line) => Ok(Inbound::Line(line)),
            Err(RecvError::Protocol(perr)) => Ok(Inbound::Garbled(perr)),
            Err(e) => {
                let addr = self
                    .peer()
                    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
                self.link = None;
                self.state = LinkState::Disconnected;
                warn!("link to {} lost: {}", addr, e);
                Err(ConnectionError::Lost {
                    addr,
                    reason: e.to_string(),
                })
            }
        }
    }
}
