use std::io::{self, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::abort::AbortSignal;
use crate::accumulator;
use crate::config::SocketConfig;
use crate::error::{is_timeout, Error, Result};
use crate::listener::Listened;

/// Anything the HTTP helpers can talk through.
///
/// Implemented by client sockets ([`EasySocket`]) and by accepted
/// connections ([`Listened`]), so a listener callback can answer requests
/// with the same helpers a client uses to send them.
pub trait Transport {
    /// Sends every byte of `bytes`.
    fn send(&mut self, bytes: &[u8]) -> Result<usize>;
    /// Drains what is available, `None` once the peer is gone.
    fn receive(&mut self) -> Result<Option<Vec<u8>>>;
    /// Name of the remote host, used for the HTTP `Host` header.
    fn host(&self) -> String;
}

enum Endpoint {
    Server(TcpListener),
    Client(TcpStream),
}

/// A server or client TCP socket.
///
/// Servers are created with [`EasySocket::server`] and hand out
/// [`Listened`] connections through [`EasySocket::accept`]. Clients are
/// created from an IP address or a hostname and exchange bytes with
/// [`EasySocket::send`] and [`EasySocket::receive`].
///
/// ```rust,no_run
/// use easy_socket::EasySocket;
///
/// let mut client = EasySocket::client_from_host("localhost", 1337)?;
/// client.send(b"Hello")?;
/// if let Some(answer) = client.receive()? {
///     println!("Received: {}", String::from_utf8_lossy(&answer));
/// }
/// # Ok::<(), easy_socket::Error>(())
/// ```
pub struct EasySocket {
    endpoint: Option<Endpoint>,
    connected: bool,
    hostname: Option<String>,
    ip: Option<IpAddr>,
    chunk_size: usize,
    nonblocking: AtomicBool,
}

impl EasySocket {
    /// Creates a server listening on every IPv4 interface.
    pub fn server(port: u16, backlog: i32) -> Result<EasySocket> {
        EasySocket::server_with(port, &SocketConfig::default().backlog(backlog))
    }

    /// Creates a server using the bind address, backlog and reuse flag of `config`.
    pub fn server_with(port: u16, config: &SocketConfig) -> Result<EasySocket> {
        let addr = SocketAddr::new(config.bind_addr(), port);
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(Error::Alloc)?;
        if config.reuses_address() {
            socket.set_reuse_address(true)?;
        }
        socket
            .bind(&addr.into())
            .map_err(|source| Error::Bind { addr, source })?;
        let backlog = config.backlog_len();
        socket
            .listen(backlog)
            .map_err(|source| Error::Listen { backlog, source })?;
        let listener: TcpListener = socket.into();
        log::debug!("Listening on {addr} with backlog {backlog}");
        Ok(EasySocket {
            endpoint: Some(Endpoint::Server(listener)),
            connected: true,
            hostname: None,
            ip: Some(addr.ip()),
            chunk_size: config.chunk_len(),
            nonblocking: AtomicBool::new(false),
        })
    }

    /// Connects to `ip:port`, where `ip` is a textual IPv4 or IPv6 address.
    pub fn client_from_ip(ip: &str, port: u16) -> Result<EasySocket> {
        EasySocket::client_from_ip_with(ip, port, &SocketConfig::default())
    }

    /// Same as [`EasySocket::client_from_ip`] with explicit tunables.
    pub fn client_from_ip_with(ip: &str, port: u16, config: &SocketConfig) -> Result<EasySocket> {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(ip.to_owned()))?;
        EasySocket::client_from_addr(SocketAddr::new(ip, port), config)
    }

    /// Resolves `hostname` and connects to it.
    pub fn client_from_host(hostname: &str, port: u16) -> Result<EasySocket> {
        EasySocket::client_from_host_with(hostname, port, &SocketConfig::default())
    }

    /// Same as [`EasySocket::client_from_host`] with explicit tunables.
    pub fn client_from_host_with(
        hostname: &str,
        port: u16,
        config: &SocketConfig,
    ) -> Result<EasySocket> {
        let ip = get_ip_from_hostname(hostname)?;
        log::debug!("Resolved {hostname} to {ip}");
        let mut socket = EasySocket::client_from_addr(SocketAddr::new(ip, port), config)?;
        socket.hostname = Some(hostname.to_owned());
        Ok(socket)
    }

    /// Connects to an already resolved socket address.
    pub fn client_from_addr(addr: SocketAddr, config: &SocketConfig) -> Result<EasySocket> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(Error::Alloc)?;
        socket
            .connect(&addr.into())
            .map_err(|source| Error::Connect { addr, source })?;
        let stream: TcpStream = socket.into();
        stream.set_nodelay(config.is_nodelay())?;
        stream.set_read_timeout(config.timeout())?;
        log::debug!("Connected to {addr}");
        Ok(EasySocket {
            endpoint: Some(Endpoint::Client(stream)),
            connected: true,
            hostname: None,
            ip: Some(addr.ip()),
            chunk_size: config.chunk_len(),
            nonblocking: AtomicBool::new(false),
        })
    }

    /// Blocks until a client connects and returns its connection.
    ///
    /// The returned connection reads messages of at most `buffer_size`
    /// bytes once [`Listened::listen`] starts its worker.
    pub fn accept<T>(&self, buffer_size: usize) -> Result<Listened<T>> {
        let listener = self.listener()?;
        let (stream, peer) = loop {
            match listener.accept() {
                Ok(pair) => break pair,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => return Err(Error::Timeout),
                Err(e) => return Err(Error::Io(e)),
            }
        };
        log::debug!("Accepted connection from: {peer}");
        Listened::new(stream, peer, buffer_size, self.chunk_size)
    }

    /// Like [`EasySocket::accept`], but gives up with [`Error::Aborted`]
    /// once `signal` is raised.
    ///
    /// The listener is back in the mode chosen with
    /// [`EasySocket::set_blocking`] when this returns.
    pub fn accept_abortable<T>(&self, buffer_size: usize, signal: &AbortSignal) -> Result<Listened<T>> {
        let listener = self.listener()?;
        let nonblocking = self.nonblocking.load(Ordering::Acquire);
        let (stream, peer) = signal.accept(listener, nonblocking)?;
        log::debug!("Accepted connection from: {peer}");
        Listened::new(stream, peer, buffer_size, self.chunk_size)
    }

    /// Sends all of `msg`.
    pub fn send(&mut self, msg: &[u8]) -> Result<usize> {
        let stream = self.stream_mut()?;
        match stream.write_all(msg) {
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

    /// Sends the first `len` bytes of `msg`.
    pub fn send_len(&mut self, msg: &[u8], len: usize) -> Result<usize> {
        if len > msg.len() {
            return Err(Error::Oversized { capacity: msg.len() });
        }
        self.send(&msg[..len])
    }

    /// Sends a text message.
    pub fn send_str(&mut self, msg: &str) -> Result<usize> {
        self.send(msg.as_bytes())
    }

    /// Drains everything the peer sent so far.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection and no
    /// byte is left; the socket is then marked disconnected.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        let chunk_size = self.chunk_size;
        let connected = self.connected;
        let stream = self.stream_mut()?;
        if !connected {
            return Ok(None);
        }
        let drained = match accumulator::drain(stream, chunk_size) {
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
            log::debug!("Peer closed the connection");
            self.connected = false;
        }
        if drained.data.is_empty() {
            Ok(None)
        } else {
            Ok(Some(drained.data))
        }
    }

    /// Reads one message that must fill `buf` exactly.
    ///
    /// An oversized message is rejected whole: the bytes past `buf` that
    /// already arrived are discarded so the next receive starts clean.
    pub fn receive_exact_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream_mut()?;
        let result = accumulator::read_fixed(stream, buf);
        match &result {
            Err(Error::Disconnected) => self.connected = false,
            Err(Error::Oversized { .. }) => {
                let discarded = accumulator::discard_pending(stream)?;
                log::debug!("Discarded {discarded} bytes of an oversized message");
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
                log::debug!("Fixed receive failed: {e}");
                false
            }
        }
    }

    /// Sets the receive timeout in milliseconds; zero waits forever.
    pub fn set_timeout(&self, milliseconds: u64) -> Result<()> {
        let timeout = (milliseconds > 0).then(|| Duration::from_millis(milliseconds));
        match self.endpoint()? {
            Endpoint::Server(listener) => SockRef::from(listener).set_read_timeout(timeout)?,
            Endpoint::Client(stream) => stream.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    /// Switches the socket between blocking and non-blocking mode.
    pub fn set_blocking(&self, blocking: bool) -> Result<()> {
        match self.endpoint()? {
            Endpoint::Server(listener) => listener.set_nonblocking(!blocking)?,
            Endpoint::Client(stream) => stream.set_nonblocking(!blocking)?,
        }
        self.nonblocking.store(!blocking, Ordering::Release);
        Ok(())
    }

    /// Overrides the connected flag.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Whether the socket is still considered connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether this is a listening socket.
    pub fn is_server(&self) -> bool {
        matches!(self.endpoint, Some(Endpoint::Server(_)))
    }

    /// Whether [`EasySocket::close`] already ran.
    pub fn is_closed(&self) -> bool {
        self.endpoint.is_none()
    }

    /// The hostname the client was created from, if any.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// The remote IP of a client, or the bind IP of a server.
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self.endpoint()? {
            Endpoint::Server(listener) => Ok(listener.local_addr()?),
            Endpoint::Client(stream) => Ok(stream.local_addr()?),
        }
    }

    /// Address of the remote peer of a client socket.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match self.endpoint()? {
            Endpoint::Server(_) => Err(Error::WrongRole("client")),
            Endpoint::Client(stream) => Ok(stream.peer_addr()?),
        }
    }

    /// Shuts the socket down and releases its descriptor.
    ///
    /// A second call returns [`Error::Closed`] and changes nothing.
    pub fn close(&mut self) -> Result<()> {
        match self.endpoint.take() {
            None => Err(Error::Closed),
            Some(Endpoint::Client(stream)) => {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    log::debug!("Shutdown before close failed: {e}");
                }
                self.connected = false;
                Ok(())
            }
            Some(Endpoint::Server(listener)) => {
                drop(listener);
                self.connected = false;
                Ok(())
            }
        }
    }

    fn endpoint(&self) -> Result<&Endpoint> {
        self.endpoint.as_ref().ok_or(Error::Closed)
    }

    fn listener(&self) -> Result<&TcpListener> {
        match self.endpoint()? {
            Endpoint::Server(listener) => Ok(listener),
            Endpoint::Client(_) => Err(Error::WrongRole("server")),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        match self.endpoint.as_mut() {
            Some(Endpoint::Client(stream)) => Ok(stream),
            Some(Endpoint::Server(_)) => Err(Error::WrongRole("client")),
            None => Err(Error::Closed),
        }
    }
}

impl Transport for EasySocket {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        EasySocket::send(self, bytes)
    }

    fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        EasySocket::receive(self)
    }

    fn host(&self) -> String {
        match (&self.hostname, self.ip) {
            (Some(hostname), _) => hostname.clone(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => String::new(),
        }
    }
}

impl std::fmt::Debug for EasySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self.endpoint {
            Some(Endpoint::Server(_)) => "server",
            Some(Endpoint::Client(_)) => "client",
            None => "closed",
        };
        f.debug_struct("EasySocket")
            .field("role", &role)
            .field("connected", &self.connected)
            .field("hostname", &self.hostname)
            .field("ip", &self.ip)
            .finish()
    }
}

/// Resolves `host` to one IP address, preferring IPv4.
pub fn get_ip_from_hostname(host: &str) -> Result<IpAddr> {
    let resolve_err = |source| Error::Resolve { host: host.to_owned(), source };
    let addrs: Vec<SocketAddr> = (host, 0).to_socket_addrs().map_err(resolve_err)?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| resolve_err(io::Error::new(io::ErrorKind::NotFound, "no address found")))
}
