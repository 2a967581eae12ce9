use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

const ACCEPT_KEY: usize = 0;

/// Cancels an [`EasySocket::accept_abortable`](crate::EasySocket::accept_abortable) call from another thread.
///
/// Clones share the same signal. Once raised, every pending and future
/// abortable accept using it fails with [`Error::Aborted`] until
/// [`AbortSignal::reset`] is called. A signal guards one accept at a time.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

struct Inner {
    aborted: AtomicBool,
    poller: polling::Poller,
}

impl AbortSignal {
    /// Creates a signal in the lowered state.
    pub fn new() -> Result<AbortSignal> {
        Ok(AbortSignal {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                poller: polling::Poller::new()?,
            }),
        })
    }

    /// Raises the signal and wakes a waiting accept.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        if let Err(e) = self.inner.poller.notify() {
            log::warn!("Failed to wake the accepting thread: {e}");
        }
    }

    /// Whether the signal is raised.
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Lowers the signal so it can guard another accept.
    pub fn reset(&self) {
        self.inner.aborted.store(false, Ordering::Release);
    }

    /// Accepts on `listener`, leaving it in the mode given by `nonblocking`.
    pub(crate) fn accept(&self, listener: &TcpListener, nonblocking: bool) -> Result<(TcpStream, SocketAddr)> {
        if self.is_aborted() {
            return Err(Error::Aborted);
        }
        listener.set_nonblocking(true)?;
        let result = self.wait_accept(listener);
        if let Err(e) = self.inner.poller.delete(listener) {
            log::debug!("Failed to remove the listener from the poller: {e}");
        }
        listener.set_nonblocking(nonblocking)?;
        let (stream, peer) = result?;
        // BSD-derived systems hand out accepted sockets in the listener's mode.
        stream.set_nonblocking(false)?;
        Ok((stream, peer))
    }

    fn wait_accept(&self, listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
        let poller = &self.inner.poller;
        // SAFETY: the listener is deleted from the poller before `accept` returns.
        unsafe {
            poller.add(listener, polling::Event::readable(ACCEPT_KEY))?;
        }
        let mut events = polling::Events::new();
        loop {
            if self.is_aborted() {
                log::debug!("Accept aborted");
                return Err(Error::Aborted);
            }
            match listener.accept() {
                Ok(pair) => return Ok(pair),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
            events.clear();
            match poller.wait(&mut events, None) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Io(e)),
            }
            poller.modify(listener, polling::Event::readable(ACCEPT_KEY))?;
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_signal_rejects_accept_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let signal = AbortSignal::new().unwrap();
        signal.abort();
        assert!(matches!(signal.accept(&listener, false), Err(Error::Aborted)));

        signal.reset();
        assert!(!signal.is_aborted());
    }

    #[test]
    fn abort_wakes_a_blocked_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let signal = AbortSignal::new().unwrap();
        let remote = signal.clone();
        let aborter = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            remote.abort();
        });
        assert!(matches!(signal.accept(&listener, false), Err(Error::Aborted)));
        aborter.join().unwrap();
    }

    #[test]
    fn pending_connection_is_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let signal = AbortSignal::new().unwrap();
        let (_stream, peer) = signal.accept(&listener, false).unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[test]
    fn listener_mode_is_restored_after_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let signal = AbortSignal::new().unwrap();
        let (stream, _) = signal.accept(&listener, true).unwrap();

        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        // The accepted stream blocks until its timeout instead of failing at once.
        use std::io::Read;
        use std::time::{Duration, Instant};
        stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let started = Instant::now();
        assert!((&stream).read(&mut [0u8; 1]).is_err());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }
}
