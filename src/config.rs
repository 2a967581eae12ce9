use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Size of each read performed by the drain receive.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default number of pending connections a server queues.
pub const DEFAULT_BACKLOG: i32 = 128;

/// Tunables applied when a socket is created.
///
/// ```rust
/// use easy_socket::SocketConfig;
/// use std::time::Duration;
///
/// let config = SocketConfig::default()
///     .backlog(16)
///     .nodelay(true)
///     .read_timeout(Some(Duration::from_millis(500)));
/// assert_eq!(config.backlog_len(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    backlog: i32,
    bind_ip: IpAddr,
    reuse_address: bool,
    nodelay: bool,
    read_timeout: Option<Duration>,
    chunk_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            backlog: DEFAULT_BACKLOG,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            reuse_address: true,
            nodelay: false,
            read_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SocketConfig {
    /// Sets the listen backlog of server sockets.
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Sets the address server sockets bind to.
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Enables `SO_REUSEADDR` on server sockets.
    pub fn reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    /// Enables `TCP_NODELAY` on client sockets.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Sets the receive timeout of client sockets. A zero duration means none.
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Sets the chunk size used by the drain receive. Zero is raised to one.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// The configured backlog.
    pub fn backlog_len(&self) -> i32 {
        self.backlog
    }

    /// The configured bind address.
    pub fn bind_addr(&self) -> IpAddr {
        self.bind_ip
    }

    /// Whether `SO_REUSEADDR` is requested.
    pub fn reuses_address(&self) -> bool {
        self.reuse_address
    }

    /// Whether `TCP_NODELAY` is requested.
    pub fn is_nodelay(&self) -> bool {
        self.nodelay
    }

    /// The configured receive timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// The configured drain chunk size.
    pub fn chunk_len(&self) -> usize {
        self.chunk_size
    }
}
