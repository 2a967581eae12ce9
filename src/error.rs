use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way an `easy-socket` operation can fail.
///
/// Each establishment step has its own variant so callers can tell a port
/// already in use (`Bind`) from a refused connection (`Connect`) without
/// inspecting OS error codes.
#[derive(Debug, Error)]
pub enum Error {
    /// A socket descriptor or a connection's receive buffer could not be
    /// allocated.
    #[error("allocation failed: {0}")]
    Alloc(#[source] io::Error),

    /// Binding the server socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the server tried to bind.
        addr: SocketAddr,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Switching the bound socket to listening mode failed.
    #[error("failed to listen with backlog {backlog}: {source}")]
    Listen {
        /// Requested backlog.
        backlog: i32,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Connecting to the remote peer failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address the client tried to reach.
        addr: SocketAddr,
        /// Underlying OS error.
        source: io::Error,
    },

    /// The hostname could not be resolved to an address.
    #[error("cannot resolve host {host}: {source}")]
    Resolve {
        /// Hostname given by the caller.
        host: String,
        /// Underlying resolver error.
        source: io::Error,
    },

    /// The textual address is not a valid IP address.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// The peer closed the connection.
    #[error("peer disconnected")]
    Disconnected,

    /// A fixed-size receive got fewer bytes than requested.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead {
        /// Size of the caller's buffer.
        expected: usize,
        /// Bytes actually read.
        got: usize,
    },

    /// The incoming message (or requested send length) does not fit.
    #[error("message exceeds {capacity} bytes")]
    Oversized {
        /// Capacity that was exceeded.
        capacity: usize,
    },

    /// No data arrived before the receive timeout.
    #[error("receive timed out")]
    Timeout,

    /// An abortable accept was cancelled through its signal.
    #[error("accept aborted")]
    Aborted,

    /// The handle was already closed.
    #[error("socket already closed")]
    Closed,

    /// The operation does not apply to this kind of socket.
    #[error("operation requires a {0} socket")]
    WrongRole(&'static str),

    /// A listener worker panicked inside a callback.
    #[error("listener worker panicked")]
    WorkerPanicked,

    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Maps a read/write error to `Disconnected` when it means the peer is gone.
    pub(crate) fn from_transfer(e: io::Error) -> Error {
        if is_disconnect(&e) {
            Error::Disconnected
        } else if is_timeout(&e) {
            Error::Timeout
        } else {
            Error::Io(e)
        }
    }
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

pub(crate) fn is_disconnect(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        e.kind(),
        BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected | UnexpectedEof
    )
}
