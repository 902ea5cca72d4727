//! Abstract port
//!
//! The `Port` object connects the low level, non-blocking `RawPort` to
//! the rest of the program:
//! - a dedicated thread polls the socket with `mio`, splits the inbound
//!   stream into lines, and hands every line (or error) to an owned
//!   callback, usually one that forwards into a `crossbeam` channel;
//! - outbound lines are queued on a channel, and the thread writes them
//!   out in order, draining partial writes before sending anything else.
//!
//! The thread only moves bytes. All state derived from the lines lives
//! with whoever owns the receiving end of the channel.

mod iobuf;
mod tcp;

use super::proto::ProtocolError;
use log::{debug, error};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use thiserror::Error;

pub use iobuf::IOBUF_SIZE;

/// Possible errors when receiving from a `Port`
#[derive(Error, Debug)]
pub enum RecvError {
    /// No lines available at this time.
    #[error("no data available")]
    NotReady,
    /// The remote end closed the connection.
    #[error("remote closed the connection")]
    Disconnected,
    /// Error in the data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Low level IO error.
    #[error("receive failed: {0}")]
    IO(#[from] io::Error),
}

/// Possible errors when sending to a `Port`
#[derive(Error, Debug)]
pub enum SendError {
    /// Used internally between the poller thread and the `RawPort`.
    #[error("partial write pending")]
    MustDrain,
    /// The outgoing queue is full.
    #[error("outgoing queue is full")]
    Full,
    /// The port thread has exited.
    #[error("link is not connected")]
    Disconnected,
    /// Line would not fit in the port buffer.
    #[error("line of {0} bytes exceeds the port buffer")]
    TooLong(usize),
    /// Issue with the underlying IO operation.
    #[error("send failed: {0}")]
    IO(#[from] io::Error),
}

/// Generic interface for the low level part of a port.
trait RawPort {
    /// Returns a line without blocking, or RecvError::NotReady if one is not available.
    /// `Disconnected` and `IO` errors mean the port should be torn down.
    fn recv(&mut self) -> Result<String, RecvError>;

    /// Attempts to send raw bytes. If it doesn't return Ok:
    /// - if it returned MustDrain, the data was sent partially, and must be drained via drain()
    /// - if it returned Full, the last send was MustDrain and it hasn't been drained yet
    /// - for all other errors, the port should be torn down.
    fn send(&mut self, raw: &[u8]) -> Result<(), SendError>;

    /// Drain partially written data.
    fn drain(&mut self) -> Result<(), SendError> {
        Ok(())
    }

    /// Returns whether this port has data to drain.
    fn has_data_to_drain(&self) -> bool {
        false
    }

    /// Closes both directions of the underlying connection.
    fn shutdown(&mut self) {}
}

/// Resolves `host:port`, returning the first address found.
pub fn find_addr(host: &str, port: u16) -> Result<SocketAddr, io::Error> {
    let mut iter = (host, port).to_socket_addrs()?;
    iter.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("address resolution failed for {}", host),
        )
    })
}

/// Opaque port object, encapsulating I/O with an underlying `RawPort`
/// running on its own thread.
pub struct Port {
    tx: Option<crossbeam::channel::Sender<String>>,
    waker: mio::Waker,
    peer: SocketAddr,
}

/// Default size of the rx channel when receiving to a crossbeam channel.
pub static DEFAULT_RX_CHANNEL_SIZE: usize = 256;
/// Default size of the queue of lines waiting to be written.
pub static DEFAULT_TX_CHANNEL_SIZE: usize = 32;

const WAKER: mio::Token = mio::Token(0);
const RAW_PORT: mio::Token = mio::Token(1);

impl Port {
    /// Method running the `Port` thread event loop. It bridges `mio` and
    /// `crossbeam::channel`, and it takes care of tx buffering/draining.
    fn poller_thread<
        RawPortT: RawPort + mio::event::Source,
        RxCallbackT: Fn(Result<String, RecvError>) -> io::Result<()>,
    >(
        mut raw_port: RawPortT,
        mut poll: mio::Poll,
        rx: RxCallbackT,
        tx: crossbeam::channel::Receiver<String>,
    ) {
        use crossbeam::channel::TryRecvError;

        let mut events = mio::Events::with_capacity(4);
        let mut needs_draining = false;

        // Set when queued lines were left alone because a partial write
        // had to be finished first.
        let mut needs_tx_queue_check = false;

        if let Err(e) = poll
            .registry()
            .register(&mut raw_port, RAW_PORT, mio::Interest::READABLE)
        {
            error!("port registration failed: {}", e);
            let _ = rx(Err(RecvError::IO(e)));
            return;
        }

        'ioloop: loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("port poll failed: {}", e);
                let _ = rx(Err(RecvError::IO(e)));
                break 'ioloop;
            }

            let mut check_tx_channel = false;

            for event in events.iter() {
                match event.token() {
                    WAKER => {
                        // One or more lines were queued, or the queue was closed.
                        if needs_draining {
                            needs_tx_queue_check = true;
                        } else {
                            check_tx_channel = true;
                        }
                    }
                    RAW_PORT => {
                        if event.is_writable() && needs_draining {
                            match raw_port.drain() {
                                Ok(_) => {
                                    needs_draining = false;
                                    if let Err(e) = poll.registry().reregister(
                                        &mut raw_port,
                                        RAW_PORT,
                                        mio::Interest::READABLE,
                                    ) {
                                        error!("readable interest set failed: {}", e);
                                        break 'ioloop;
                                    }
                                }
                                Err(SendError::MustDrain) => {
                                    // Must keep trying, do nothing
                                }
                                Err(e) => {
                                    debug!("drain failed: {}", e);
                                    break 'ioloop;
                                }
                            }
                        }
                        // Lines or errors available from the instrument
                        loop {
                            match raw_port.recv() {
                                Ok(line) => {
                                    if rx(Ok(line)).is_err() {
                                        break 'ioloop;
                                    }
                                }
                                Err(RecvError::NotReady) => {
                                    break;
                                }
                                Err(e) => {
                                    // Protocol errors are passed along and the port keeps
                                    // going; anything else ends the link.
                                    let fatal = !matches!(e, RecvError::Protocol(_));
                                    if rx(Err(e)).is_err() || fatal {
                                        break 'ioloop;
                                    }
                                }
                            }
                        }
                    }
                    mio::Token(x) => {
                        error!("unexpected poll token {}", x);
                    }
                }
            }

            if !needs_draining && needs_tx_queue_check {
                check_tx_channel = true;
                needs_tx_queue_check = false;
            }

            if check_tx_channel {
                // Dequeue and send to the socket, or break out.
                loop {
                    match tx.try_recv() {
                        Ok(line) => match raw_port.send(line.as_bytes()) {
                            Ok(_) => {}
                            Err(SendError::MustDrain) => {
                                needs_draining = true;
                                needs_tx_queue_check = true;
                                if let Err(e) = poll.registry().reregister(
                                    &mut raw_port,
                                    RAW_PORT,
                                    mio::Interest::READABLE.add(mio::Interest::WRITABLE),
                                ) {
                                    error!("writable interest set failed: {}", e);
                                    break 'ioloop;
                                }
                                break;
                            }
                            Err(e) => {
                                debug!("send failed: {}", e);
                                break 'ioloop;
                            }
                        },
                        Err(TryRecvError::Empty) => {
                            break;
                        }
                        Err(TryRecvError::Disconnected) => {
                            // The owning `Port` was dropped.
                            raw_port.shutdown();
                            break 'ioloop;
                        }
                    }
                }
            }
        }
        debug!("port thread exiting");
    }

    /// Create a `Port` from a `RawPort` and a rx callback.
    fn from_raw<
        RawPortT: RawPort + mio::event::Source + Send + 'static,
        RxCallbackT: Fn(Result<String, RecvError>) -> io::Result<()> + Send + 'static,
    >(
        raw_port: RawPortT,
        peer: SocketAddr,
        rx: RxCallbackT,
    ) -> io::Result<Port> {
        let (tx, ttx) = crossbeam::channel::bounded::<String>(DEFAULT_TX_CHANNEL_SIZE);
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), WAKER)?;
        thread::Builder::new()
            .name(format!("telecon-port-{}", peer))
            .spawn(move || {
                Port::poller_thread(raw_port, poll, rx, ttx);
            })?;
        Ok(Port {
            tx: Some(tx),
            waker,
            peer,
        })
    }

    /// Connects to `address` with a single attempt bounded by `timeout`,
    /// sending every received line or error to `rx` from the port thread.
    /// If `rx` returns an `Err()`, the port is closed.
    pub fn connect<RXT: Fn(Result<String, RecvError>) -> io::Result<()> + Send + 'static>(
        address: &SocketAddr,
        timeout: Duration,
        rx: RXT,
    ) -> io::Result<Port> {
        let raw = tcp::Port::connect(address, timeout)?;
        let peer = raw.peer_addr().unwrap_or(*address);
        Port::from_raw(raw, peer, rx)
    }

    /// Create a new port over an already connected `std::net::TcpStream`.
    pub fn from_tcp_stream<
        RXT: Fn(Result<String, RecvError>) -> io::Result<()> + Send + 'static,
    >(
        stream: std::net::TcpStream,
        rx: RXT,
    ) -> io::Result<Port> {
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr()?;
        let raw = tcp::Port::from_stream(mio::net::TcpStream::from_std(stream))?;
        Port::from_raw(raw, peer, rx)
    }

    /// Creates a sender/receiver pair to be used with `rx_to_channel`:
    /// ```ignore
    /// let (port_rx_send, port_rx) = Port::rx_channel();
    /// let port = Port::connect(&addr, timeout, Port::rx_to_channel(port_rx_send))?;
    /// ```
    /// `port.try_send()` can now be used to send and `port_rx.recv()` to receive.
    pub fn rx_channel() -> (
        crossbeam::channel::Sender<Result<String, RecvError>>,
        crossbeam::channel::Receiver<Result<String, RecvError>>,
    ) {
        crossbeam::channel::bounded::<Result<String, RecvError>>(DEFAULT_RX_CHANNEL_SIZE)
    }

    /// Returns a RX callback which forwards the received results to a channel
    /// (see `rx_channel`). When the channel is full the port thread waits,
    /// which in turn leaves data in the socket buffer.
    pub fn rx_to_channel(
        rx_send: crossbeam::channel::Sender<Result<String, RecvError>>,
    ) -> impl Fn(Result<String, RecvError>) -> io::Result<()> {
        move |rxdata| -> io::Result<()> {
            rx_send
                .send(rxdata)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    /// Queues a line for sending without blocking. The line is written as
    /// given, so it must carry its own terminator.
    pub fn try_send(&self, line: String) -> Result<(), SendError> {
        use crossbeam::channel::TrySendError;
        if line.len() > IOBUF_SIZE {
            return Err(SendError::TooLong(line.len()));
        }
        let tx = self.tx.as_ref().ok_or(SendError::Disconnected)?;
        match tx.try_send(line) {
            Ok(()) => {
                self.waker.wake()?;
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }

    /// Address of the remote end.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        // Closing the queue and waking the thread makes it shut the socket
        // down once everything already queued has been written.
        self.tx.take();
        let _ = self.waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn lines_reach_the_channel() {
        let (client, mut server) = pair();
        let (rx_send, rx) = Port::rx_channel();
        let _port = Port::from_tcp_stream(client, Port::rx_to_channel(rx_send)).unwrap();

        server.write_all(b"first\r\nsec").unwrap();
        server.write_all(b"ond\n").unwrap();
        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap().unwrap(), "first");
        assert_eq!(rx.recv_timeout(timeout).unwrap().unwrap(), "second");

        drop(server);
        assert!(matches!(
            rx.recv_timeout(timeout).unwrap(),
            Err(RecvError::Disconnected)
        ));
    }

    #[test]
    fn queued_lines_are_written_in_order() {
        let (client, server) = pair();
        let (rx_send, _rx) = Port::rx_channel();
        let port = Port::from_tcp_stream(client, Port::rx_to_channel(rx_send)).unwrap();

        port.try_send("get a \n".to_string()).unwrap();
        port.try_send("get b \n".to_string()).unwrap();

        let mut reader = BufReader::new(server);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "get a \n");
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "get b \n");
    }

    #[test]
    fn oversized_line_is_refused() {
        let (client, _server) = pair();
        let (rx_send, _rx) = Port::rx_channel();
        let port = Port::from_tcp_stream(client, Port::rx_to_channel(rx_send)).unwrap();
        let line = "x".repeat(IOBUF_SIZE + 1);
        assert!(matches!(port.try_send(line), Err(SendError::TooLong(n)) if n == IOBUF_SIZE + 1));
    }
}
