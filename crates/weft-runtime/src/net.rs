//! # IPv4 TCP sockets for tasks
//!
//! `Listener` and `Connection` wrap owned, non-blocking descriptors and turn
//! each operation into an event, so connection code reads as straight-line
//! logic:
//!
//! ```ignore
//! let listener = Listener::bind("", 8080)?;
//! loop {
//!     let conn = listener.accept().await?;
//!     spawn(Task::new(async move {
//!         let line = conn.readline(b"\n", 1024).await?;
//!         conn.sendall(&line).await
//!     })).await?;
//! }
//! ```
//!
//! A connection keeps the bytes it has read but not yet handed out in an
//! internal buffer. `recv` serves from that buffer first; `readline` runs
//! as a delegated task that fills it until the terminator appears, so an
//! interrupted `readline` loses nothing.
//!
//! Hosts are IPv4 literals. `""` binds every interface and `"localhost"`
//! means 127.0.0.1; there is no resolver.

use core::fmt;
use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::Rc;

use weft_core::constants::LISTEN_BACKLOG;
use weft_core::{Resource, TaskError, TaskResult};

use crate::event::Event;
use crate::task::{suspend, Task};
use crate::{sys, RawFd};

/// Turn a host string into an IPv4 address
pub fn parse_host(host: &str) -> TaskResult<Ipv4Addr> {
    match host {
        "" => Ok(Ipv4Addr::UNSPECIFIED),
        "localhost" => Ok(Ipv4Addr::LOCALHOST),
        literal => literal
            .parse()
            .map_err(|_| TaskError::InvalidAddress(literal.to_string())),
    }
}

fn os_error(errno: nix::errno::Errno) -> TaskError {
    TaskError::Os(errno as i32)
}

/// A bound, listening socket
pub struct Listener {
    fd: Option<OwnedFd>,
    addr: SocketAddrV4,
}

impl Listener {
    /// Bind and listen on `host:port`; port 0 picks a free port
    pub fn bind(host: &str, port: u16) -> TaskResult<Self> {
        let requested = SocketAddrV4::new(parse_host(host)?, port);
        let fd = sys::listen(requested, LISTEN_BACKLOG).map_err(os_error)?;
        let addr = sys::local_addr(fd.as_raw_fd()).map_err(os_error)?;
        Ok(Listener { fd: Some(fd), addr })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    pub fn fd(&self) -> TaskResult<RawFd> {
        self.fd
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or(TaskError::Closed(Resource::Listener))
    }

    /// Wait for and accept the next connection
    pub async fn accept(&self) -> TaskResult<Connection> {
        let listener = self.fd()?;
        suspend(Event::Accept { listener }).await?.into_typed()
    }

    /// Close the socket now
    pub fn close(&mut self) -> TaskResult<()> {
        match self.fd.take() {
            Some(fd) => {
                drop(fd);
                Ok(())
            }
            None => Err(TaskError::Closed(Resource::Listener)),
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Socket and unconsumed input, shared with the `readline` helper task
struct Stream {
    fd: RefCell<Option<OwnedFd>>,
    buffer: RefCell<Vec<u8>>,
    peer: SocketAddrV4,
}

impl Stream {
    fn fd(&self) -> TaskResult<RawFd> {
        self.fd
            .borrow()
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or(TaskError::Closed(Resource::Connection))
    }

    /// Remove and return the first `n` buffered bytes
    fn take_front(&self, n: usize) -> Vec<u8> {
        let mut buffer = self.buffer.borrow_mut();
        let n = n.min(buffer.len());
        buffer.drain(..n).collect()
    }

    fn find(&self, terminator: &[u8]) -> Option<usize> {
        self.buffer
            .borrow()
            .windows(terminator.len())
            .position(|w| w == terminator)
    }
}

/// A connected TCP socket with an input buffer
pub struct Connection {
    shared: Rc<Stream>,
}

impl Connection {
    pub(crate) fn from_fd(fd: OwnedFd, peer: SocketAddrV4) -> Self {
        Connection {
            shared: Rc::new(Stream {
                fd: RefCell::new(Some(fd)),
                buffer: RefCell::new(Vec::new()),
                peer,
            }),
        }
    }

    /// Open a connection to `host:port`
    pub async fn connect(host: &str, port: u16) -> TaskResult<Connection> {
        let addr = SocketAddrV4::new(parse_host(host)?, port);
        let (socket, connected) = sys::connect_start(addr).map_err(os_error)?;
        if connected {
            return Ok(Connection::from_fd(socket, addr));
        }
        suspend(Event::Connect { socket, addr }).await?.into_typed()
    }

    pub fn fd(&self) -> TaskResult<RawFd> {
        self.shared.fd()
    }

    pub fn peer_addr(&self) -> SocketAddrV4 {
        self.shared.peer
    }

    /// Number of bytes read from the socket but not yet handed out
    pub fn buffered(&self) -> usize {
        self.shared.buffer.borrow().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.fd.borrow().is_none()
    }

    /// Receive up to `size` bytes; empty means the peer closed its side
    pub async fn recv(&self, size: usize) -> TaskResult<Vec<u8>> {
        let fd = self.fd()?;
        let event = if self.buffered() > 0 {
            Event::Value(weft_core::Value::new(self.shared.take_front(size)))
        } else {
            Event::Receive { fd, size }
        };
        suspend(event).await?.into_typed()
    }

    /// Send what the socket accepts in one call; returns the count
    pub async fn send(&self, data: &[u8]) -> TaskResult<usize> {
        let fd = self.fd()?;
        let event = Event::Send { fd, data: data.to_vec(), sent: 0, all: false };
        suspend(event).await?.into_typed()
    }

    /// Send every byte of `data`
    pub async fn sendall(&self, data: &[u8]) -> TaskResult<()> {
        let fd = self.fd()?;
        let event = Event::Send { fd, data: data.to_vec(), sent: 0, all: true };
        suspend(event).await?;
        Ok(())
    }

    /// Read through `terminator` and return the line including it
    ///
    /// If the peer closes first, returns whatever was buffered (possibly
    /// empty) without a terminator. Reads `bufsize` bytes at a time.
    pub async fn readline(&self, terminator: &[u8], bufsize: usize) -> TaskResult<Vec<u8>> {
        self.fd()?;
        if terminator.is_empty() {
            return Err(TaskError::Misuse("readline needs a non-empty terminator"));
        }
        let helper = Task::new(read_line(Rc::clone(&self.shared), terminator.to_vec(), bufsize.max(1)))
            .with_name("readline");
        let line = suspend(Event::Delegate(helper)).await?;
        if line.is_none() {
            // Helper ended on a disconnect
            return Ok(self.shared.take_front(usize::MAX));
        }
        line.into_typed()
    }

    /// Close the socket now
    pub fn close(&self) -> TaskResult<()> {
        match self.shared.fd.borrow_mut().take() {
            Some(fd) => {
                drop(fd);
                Ok(())
            }
            None => Err(TaskError::Closed(Resource::Connection)),
        }
    }
}

async fn read_line(stream: Rc<Stream>, terminator: Vec<u8>, bufsize: usize) -> TaskResult<Vec<u8>> {
    loop {
        if let Some(pos) = stream.find(&terminator) {
            return Ok(stream.take_front(pos + terminator.len()));
        }
        let fd = stream.fd()?;
        let chunk: Vec<u8> = suspend(Event::Receive { fd, size: bufsize }).await?.into_typed()?;
        if chunk.is_empty() {
            return Ok(stream.take_front(usize::MAX));
        }
        stream.buffer.borrow_mut().extend_from_slice(&chunk);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.shared.peer)
            .field("buffered", &self.buffered())
            .field("closed", &self.is_closed())
            .finish()
    }
}
