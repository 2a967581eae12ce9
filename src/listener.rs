use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use uuid::Uuid;

use crate::accumulator;
use crate::error::{Error, Result};
use crate::socket::Transport;

/// An accepted connection serviced by its own worker thread.
///
/// The connection owns a receive buffer whose capacity is fixed when it is
/// accepted. Each read performed by the worker overwrites the buffer and
/// [`Listened::message`] exposes exactly the bytes of that read.
///
/// `T` is caller data carried along with the connection. The library
/// never creates it; it only stores it until the connection is handed
/// back through the terminal callback.
pub struct Listened<T = ()> {
    id: Uuid,
    stream: TcpStream,
    peer: SocketAddr,
    connected: bool,
    buffer: Box<[u8]>,
    len: usize,
    chunk_size: usize,
    data: Option<T>,
}

impl<T> Listened<T> {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, buffer_size: usize, chunk_size: usize) -> Result<Self> {
        let size = buffer_size.max(1);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|e| Error::Alloc(io::Error::new(io::ErrorKind::OutOfMemory, e)))?;
        buffer.resize(size, 0);
        Ok(Listened {
            id: Uuid::new_v4(),
            stream,
            peer,
            connected: true,
            buffer: buffer.into_boxed_slice(),
            len: 0,
            chunk_size,
            data: None,
        })
    }

    /// Unique id of this connection, used in logs and worker names.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Address of the connected client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the worker still considers the peer connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Overrides the connected flag. Clearing it from a data callback stops
    /// the worker after the callback returns.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Capacity of the receive buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes of the last message read by the worker.
    pub fn message(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// The last message as text, with invalid UTF-8 replaced.
    pub fn message_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.message())
    }

    /// Caller data attached to the connection.
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Mutable access to the caller data.
    pub fn data_mut(&mut self) -> Option<&mut T> {
        self.data.as_mut()
    }

    /// Attaches caller data, returning the previous value.
    pub fn set_data(&mut self, data: T) -> Option<T> {
        self.data.replace(data)
    }

    /// Detaches the caller data.
    pub fn take_data(&mut self) -> Option<T> {
        self.data.take()
    }

    /// Builder form of [`Listened::set_data`].
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    /// Sends all of `msg` to the client.
    pub fn send(&mut self, msg: &[u8]) -> Result<usize> {
        match self.stream.write_all(msg) {
            Ok(()) => Ok(msg.len()),
            Err(e) => {
                let err = Error::from_transfer(e);
                if matches!(err, Error::Disconnected) {
                    self.connected = false;
                }
                Err(err)
            }
        }
    }

    /// Sends a text message to the client.
    pub fn send_str(&mut self, msg: &str) -> Result<usize> {
        self.send(msg.as_bytes())
    }

    /// Drains what the client sent so far, bypassing the fixed buffer.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.connected {
            return Ok(None);
        }
        let drained = match accumulator::drain(&mut self.stream, self.chunk_size) {
            Ok(drained) => drained,
            Err(e) => match Error::from_transfer(e) {
                Error::Disconnected => {
                    self.connected = false;
                    return Ok(None);
                }
                err => return Err(err),
            },
        };
        if drained.eof {
            self.connected = false;
        }
        Ok((!drained.data.is_empty()).then_some(drained.data))
    }

    /// Reads one message that must fill `buf` exactly.
    ///
    /// The already received tail of an oversized message is discarded.
    pub fn receive_exact_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = accumulator::read_fixed(&mut self.stream, buf);
        match &result {
            Err(Error::Disconnected) => self.connected = false,
            Err(Error::Oversized { .. }) => {
                let discarded = accumulator::discard_pending(&self.stream)?;
                log::debug!("[{}] discarded {discarded} bytes of an oversized message", self.id);
            }
            _ => {}
        }
        result
    }

    /// Reads one message into `buf`; `true` only if it filled `buf` exactly.
    pub fn receive_fixed(&mut self, buf: &mut [u8]) -> bool {
        match self.receive_exact_into(buf) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("[{}] fixed receive failed: {e}", self.id);
                false
            }
        }
    }

    /// Sets the receive timeout in milliseconds; zero waits forever.
    ///
    /// A worker treats an expired timeout like a disconnect.
    pub fn set_timeout(&self, milliseconds: u64) -> Result<()> {
        let timeout = (milliseconds > 0).then(|| Duration::from_millis(milliseconds));
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Shuts both directions of the connection down.
    pub fn close(&mut self) -> Result<()> {
        self.connected = false;
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: Send + 'static> Listened<T> {
    /// Starts the worker with a data callback and a terminal callback.
    ///
    /// `on_data` runs for every message read. When the client disconnects
    /// (or the handle is cancelled) the loop ends and `on_finish` runs
    /// exactly once with the connection, which is released when the
    /// callback drops it.
    ///
    /// ```rust,no_run
    /// use easy_socket::{EasySocket, Listened};
    ///
    /// let server = EasySocket::server(1337, 100)?;
    /// loop {
    ///     let client: Listened = server.accept(1024)?;
    ///     client.listen(
    ///         |c| println!("Hi! You said: {}", c.message_str()),
    ///         |c| println!("{} is gone", c.peer_addr()),
    ///     )?;
    /// }
    /// # Ok::<(), easy_socket::Error>(())
    /// ```
    pub fn listen<F, G>(self, on_data: F, on_finish: G) -> Result<ListenerHandle>
    where
        F: FnMut(&mut Listened<T>) + Send + 'static,
        G: FnOnce(Listened<T>) + Send + 'static,
    {
        self.listen_with(FnHandler::new(on_data, on_finish))
    }

    /// Starts the worker driving `handler`.
    pub fn listen_with<H>(self, handler: H) -> Result<ListenerHandle>
    where
        H: ConnectionHandler<T> + Send + 'static,
    {
        let control = self.stream.try_clone()?;
        let id = self.id;
        let peer = self.peer;
        let name = format!("es-listener-{}", &id.simple().to_string()[..8]);
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || run(self, handler))?;
        log::debug!("[{id}] listener started for {peer}");
        Ok(ListenerHandle { id, peer, control, thread })
    }
}

impl<T> Drop for Listened<T> {
    fn drop(&mut self) {
        // The handle keeps a duplicate descriptor; shutting down makes the
        // peer see the close now rather than when the handle goes away.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl<T> Transport for Listened<T> {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        Listened::send(self, bytes)
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        Listened::receive(self)
    }

    fn host(&self) -> String {
        self.peer.ip().to_string()
    }
}

impl<T> std::fmt::Debug for Listened<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listened")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.connected)
            .field("capacity", &self.buffer.len())
            .field("len", &self.len)
            .finish()
    }
}

/// Callbacks driven by a listener worker.
pub trait ConnectionHandler<T> {
    /// Called once per message, with the message in [`Listened::message`].
    fn on_data(&mut self, conn: &mut Listened<T>);

    /// Called exactly once when the worker loop ends.
    fn on_finish(self, conn: Listened<T>);
}

/// [`ConnectionHandler`] built from two closures.
pub struct FnHandler<F, G> {
    on_data: F,
    on_finish: G,
}

impl<F, G> FnHandler<F, G> {
    /// Pairs a data closure with a terminal closure.
    pub fn new(on_data: F, on_finish: G) -> Self {
        FnHandler { on_data, on_finish }
    }
}

impl<T, F, G> ConnectionHandler<T> for FnHandler<F, G>
where
    F: FnMut(&mut Listened<T>),
    G: FnOnce(Listened<T>),
{
    fn on_data(&mut self, conn: &mut Listened<T>) {
        (self.on_data)(conn)
    }

    fn on_finish(self, conn: Listened<T>) {
        (self.on_finish)(conn)
    }
}

fn run<T, H: ConnectionHandler<T>>(mut conn: Listened<T>, mut handler: H) {
    let mut panicked = None;
    while conn.connected {
        match conn.stream.read(&mut conn.buffer) {
            Ok(0) => {
                log::debug!("[{}] peer {} closed the connection", conn.id, conn.peer);
                conn.connected = false;
            }
            Ok(n) => {
                conn.len = n;
                let delivered = panic::catch_unwind(AssertUnwindSafe(|| handler.on_data(&mut conn)));
                if let Err(payload) = delivered {
                    log::warn!("[{}] data callback panicked, dropping {}", conn.id, conn.peer);
                    conn.connected = false;
                    panicked = Some(payload);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("[{}] read failed, dropping {}: {e}", conn.id, conn.peer);
                conn.connected = false;
            }
        }
    }
    conn.len = 0;
    log::debug!("[{}] listener finished", conn.id);
    handler.on_finish(conn);
    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }
}

/// Owner's handle on a running listener worker.
///
/// Dropping the handle detaches the worker, which keeps running until its
/// client disconnects.
#[derive(Debug)]
pub struct ListenerHandle {
    id: Uuid,
    peer: SocketAddr,
    control: TcpStream,
    thread: JoinHandle<()>,
}

impl ListenerHandle {
    /// Id of the serviced connection.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Address of the serviced client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Shuts the connection down so the worker leaves its loop and runs
    /// the terminal callback.
    pub fn cancel(&self) -> Result<()> {
        match self.control.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the worker has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the worker to return.
    pub fn join(self) -> Result<()> {
        self.thread.join().map_err(|_| Error::WorkerPanicked)
    }
}

/// A set of listener workers shut down together.
///
/// ```rust,no_run
/// use easy_socket::{EasySocket, ListenerGroup, Listened};
///
/// let server = EasySocket::server(1337, 100)?;
/// let mut group = ListenerGroup::default();
/// for _ in 0..10 {
///     let client: Listened = server.accept(1024)?;
///     group.push(client.listen(|_| {}, |_| {})?);
///     group.reap_finished();
/// }
/// group.shutdown()?;
/// # Ok::<(), easy_socket::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct ListenerGroup {
    handles: Vec<ListenerHandle>,
}

impl ListenerGroup {
    /// Adds a worker to the group.
    pub fn push(&mut self, handle: ListenerHandle) {
        self.handles.push(handle);
    }

    /// Number of tracked workers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no worker is tracked.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Joins and forgets workers that already returned; returns how many.
    pub fn reap_finished(&mut self) -> usize {
        let (done, running): (Vec<_>, Vec<_>) =
            self.handles.drain(..).partition(ListenerHandle::is_finished);
        self.handles = running;
        let reaped = done.len();
        for handle in done {
            let id = handle.id();
            if handle.join().is_err() {
                log::warn!("[{id}] listener worker panicked");
            }
        }
        reaped
    }

    /// Cancels every tracked worker.
    pub fn cancel_all(&self) {
        for handle in &self.handles {
            if let Err(e) = handle.cancel() {
                log::warn!("[{}] cancel failed: {e}", handle.id());
            }
        }
    }

    /// Waits for every tracked worker, reporting the first panic.
    pub fn join_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                result = result.and(Err(e));
            }
        }
        result
    }

    /// Cancels then joins every tracked worker.
    pub fn shutdown(&mut self) -> Result<()> {
        self.cancel_all();
        self.join_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;

    fn pair(buffer_size: usize) -> (Listened<u32>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        (Listened::new(stream, peer, buffer_size, 1024).unwrap(), client)
    }

    #[test]
    fn user_data_round_trips() {
        let (mut conn, _client) = pair(8);
        assert!(conn.data().is_none());
        assert_eq!(conn.set_data(1), None);
        *conn.data_mut().unwrap() += 1;
        assert_eq!(conn.take_data(), Some(2));
        assert!(conn.with_data(7).data() == Some(&7));
    }

    #[test]
    fn zero_sized_buffer_is_raised_to_one_byte() {
        let (conn, _client) = pair(0);
        assert_eq!(conn.capacity(), 1);
        assert!(conn.message().is_empty());
    }

    #[test]
    fn worker_hands_each_read_to_the_callback() {
        let (conn, mut client) = pair(64);
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let handle = conn
            .with_data(0)
            .listen(
                move |c| {
                    *c.data_mut().unwrap() += 1;
                    tx.send(c.message().to_vec()).unwrap();
                    c.send(b"ack").unwrap();
                },
                move |mut c| done_tx.send(c.take_data()).unwrap(),
            )
            .unwrap();

        client.write_all(b"ping").unwrap();
        assert_eq!(rx.recv().unwrap(), b"ping");
        let mut ack = [0u8; 3];
        client.read_exact(&mut ack).unwrap();
        assert_eq!(&ack, b"ack");

        drop(client);
        assert_eq!(done_rx.recv().unwrap(), Some(1));
        handle.join().unwrap();
    }

    #[test]
    fn clearing_connected_stops_the_worker() {
        let (conn, mut client) = pair(16);
        let (done_tx, done_rx) = mpsc::channel();
        let handle = conn
            .listen(|c| c.set_connected(false), move |c| done_tx.send(c.is_connected()).unwrap())
            .unwrap();
        client.write_all(b"bye").unwrap();
        assert_eq!(done_rx.recv().unwrap(), false);
        handle.join().unwrap();
    }

    #[test]
    fn panicking_callback_is_reported_on_join() {
        let (conn, mut client) = pair(16);
        let (done_tx, done_rx) = mpsc::channel();
        let handle = conn
            .listen(|_| panic!("boom"), move |c| done_tx.send(c.is_connected()).unwrap())
            .unwrap();
        client.write_all(b"x").unwrap();
        assert!(matches!(handle.join(), Err(Error::WorkerPanicked)));
        assert_eq!(done_rx.try_recv().unwrap(), false);
        assert!(done_rx.try_recv().is_err());
    }
}
