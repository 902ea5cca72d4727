//! TCP Port
//!
//! Implements a `RawPort` for a TCP stream, and an MIO event source.
//! The instrument link is line oriented: received bytes are buffered and
//! split at newlines, and outgoing lines are written whole or, when the
//! socket buffer fills up, finished later by draining.

use super::{iobuf::IOBuf, RawPort, RecvError, SendError};
use mio::net::TcpStream;
use std::io;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

/// RawPort to communicate via TCP
pub struct Port {
    /// Underlying stream
    stream: TcpStream,
    /// Incoming buffer, used to buffer partial lines.
    rxbuf: IOBuf,
    /// Outgoing buffer, used for all-or-none sends of lines
    /// when the TCP buffer fills up.
    txbuf: IOBuf,
}

impl Port {
    /// Takes ownership of a MIO `TcpStream` and constructs a `Port` over it.
    pub fn from_stream(stream: TcpStream) -> Result<Port, io::Error> {
        Ok(Port {
            stream,
            rxbuf: IOBuf::new(),
            txbuf: IOBuf::new(),
        })
    }

    /// Makes a single blocking connection attempt bounded by `timeout`,
    /// then switches the socket to non-blocking mode.
    pub fn connect(address: &SocketAddr, timeout: Duration) -> Result<Port, io::Error> {
        let stream = std::net::TcpStream::connect_timeout(address, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Port::from_stream(TcpStream::from_std(stream))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Attempts to receive a line only from the data currently present
    /// in the incoming buffer.
    fn recv_buffered(&mut self) -> Result<String, RecvError> {
        match self.rxbuf.take_line() {
            Some(Ok(line)) => Ok(line),
            Some(Err(perr)) => Err(RecvError::Protocol(perr)),
            None => Err(RecvError::NotReady),
        }
    }
}

impl RawPort for Port {
    fn recv(&mut self) -> Result<String, RecvError> {
        let mut res = self.recv_buffered();
        if let Err(RecvError::NotReady) = res {
            self.rxbuf.refill(&mut self.stream)?;
            res = self.recv_buffered();
        }
        res
    }

    fn send(&mut self, raw: &[u8]) -> Result<(), SendError> {
        if self.has_data_to_drain() {
            return Err(SendError::Full);
        }

        match self.stream.write(raw) {
            Ok(size) => {
                if size == raw.len() {
                    Ok(())
                } else {
                    // Partial write, the TCP buffer is full. Keep the rest of
                    // the line so it goes out before anything else.
                    self.txbuf
                        .add_data(&raw[size..])
                        .map_err(|_| SendError::TooLong(raw.len()))?;
                    Err(SendError::MustDrain)
                }
            }
            Err(err) => match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected => {
                    self.txbuf
                        .add_data(raw)
                        .map_err(|_| SendError::TooLong(raw.len()))?;
                    Err(SendError::MustDrain)
                }
                _ => Err(SendError::IO(err)),
            },
        }
    }

    fn drain(&mut self) -> Result<(), SendError> {
        self.txbuf.drain(&mut self.stream)
    }

    fn has_data_to_drain(&self) -> bool {
        !self.txbuf.empty()
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

impl mio::event::Source for Port {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
