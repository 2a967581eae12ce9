//! # Easy Socket - Friendly TCP Sockets
//!
//! Easy Socket is a small Rust library that takes the ceremony out of
//! blocking TCP sockets. Servers, clients, per-connection worker threads
//! and a pinch of HTTP are each a single call away, while every failure
//! stays a typed, distinguishable error.
//!
//! ## Key Features
//!
//! - **One-call endpoints**: create a listening server from a port and a
//!   backlog, or a client from an IP address or a hostname
//! - **Listener workers**: every accepted connection can be handed to its
//!   own thread that calls you back for each message and once more when
//!   the client leaves
//! - **Owned workers**: workers are returned as handles that can be
//!   cancelled and joined, alone or as a [`ListenerGroup`]
//! - **Cancellable accept**: an [`AbortSignal`] interrupts a blocked
//!   accept from another thread
//! - **HTTP helpers**: format and send simple requests and canned
//!   responses over an established connection
//!
//! ## How It Works
//!
//! Receiving drains the socket in fixed-size chunks until a read comes
//! back short, then joins the chunks into one buffer. Listener workers use
//! a buffer of fixed capacity instead: each read becomes one message. A
//! read of zero bytes means the peer is gone, which ends the worker and
//! triggers the terminal callback exactly once.
//!
//! ## Basic Usage
//!
//! ### Server Side
//!
//! ```rust,no_run
//! use easy_socket::{EasySocket, Listened};
//!
//! let _runtime = easy_socket::init()?;
//! let server = EasySocket::server(1337, 100)?;
//!
//! loop {
//!     let client: Listened = server.accept(1024)?;
//!     client.listen(
//!         |c| {
//!             println!("Hi! You said: {}", c.message_str());
//!             let _ = c.send(b"Hello back");
//!         },
//!         |c| println!("{} is freed!", c.peer_addr()),
//!     )?;
//! }
//! # Ok::<(), easy_socket::Error>(())
//! ```
//!
//! ### Client Side
//!
//! ```rust,no_run
//! use easy_socket::EasySocket;
//!
//! let runtime = easy_socket::init()?;
//! let mut sock = EasySocket::client_from_host("localhost", 1337)?;
//! sock.send(b"Hello")?;
//!
//! let mut buffer = [0u8; 10];
//! if sock.receive_fixed(&mut buffer) {
//!     println!("Received: {}", String::from_utf8_lossy(&buffer));
//! }
//! sock.close()?;
//! runtime.end();
//! # Ok::<(), easy_socket::Error>(())
//! ```
//!
//! ## Configuration
//!
//! Constructors with a `_with` suffix take a [`SocketConfig`] carrying the
//! bind address, backlog, address reuse, `TCP_NODELAY`, receive timeout
//! and drain chunk size.
//!
//! ## Logging
//!
//! The library logs through the `log` facade; binaries in this repository
//! forward it to `tracing` and filter with `RUST_LOG`.

#![warn(missing_docs)]

mod abort;
mod accumulator;
mod config;
mod error;
mod listener;
mod runtime;
mod socket;

pub mod http;

pub use abort::AbortSignal;
pub use accumulator::{drain, read_fixed, Drained};
pub use config::{SocketConfig, DEFAULT_BACKLOG, DEFAULT_CHUNK_SIZE};
pub use error::{Error, Result};
pub use listener::{ConnectionHandler, FnHandler, Listened, ListenerGroup, ListenerHandle};
pub use runtime::{init, is_initialized, SocketRuntime};
pub use socket::{get_ip_from_hostname, EasySocket, Transport};
