//! Process-wide socket subsystem lifecycle.
//!
//! Some platforms (Windows) require the socket subsystem to be started
//! before the first socket call. The embedding application calls [`init`]
//! once, keeps the returned [`SocketRuntime`] alive for as long as it uses
//! sockets and ends it with [`SocketRuntime::end`] (or by dropping it).
//! Nested `init` calls are counted and [`is_initialized`] reports whether a
//! guard is alive.
//!
//! [`init`] only forces startup early so its failure is reported there.
//! Ending the last guard is bookkeeping: the platform subsystem stays up,
//! since the standard library and `socket2` own its lifetime.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;

static ACTIVE: AtomicUsize = AtomicUsize::new(0);

/// Guard for an initialised socket subsystem.
#[derive(Debug)]
#[must_use = "dropping the runtime ends it immediately"]
pub struct SocketRuntime {
    ended: bool,
}

/// Starts the socket subsystem.
pub fn init() -> Result<SocketRuntime> {
    if ACTIVE.fetch_add(1, Ordering::AcqRel) == 0 {
        if let Err(e) = startup() {
            ACTIVE.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }
        log::debug!("Socket subsystem started");
    }
    Ok(SocketRuntime { ended: false })
}

/// Whether at least one [`SocketRuntime`] is alive.
pub fn is_initialized() -> bool {
    ACTIVE.load(Ordering::Acquire) > 0
}

impl SocketRuntime {
    /// Ends this runtime guard. Sockets keep working afterwards.
    pub fn end(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if ACTIVE.fetch_sub(1, Ordering::AcqRel) == 1 {
            log::debug!("Last socket runtime ended");
        }
    }
}

impl Drop for SocketRuntime {
    fn drop(&mut self) {
        self.release();
    }
}

// The standard library and socket2 start Winsock lazily on first use; creating
// and dropping one socket forces that here so failures surface from `init`.
fn startup() -> Result<()> {
    let probe = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None)
        .map_err(crate::Error::Alloc)?;
    drop(probe);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_runtimes_are_counted() {
        let outer = init().unwrap();
        let inner = init().unwrap();
        assert!(is_initialized());
        inner.end();
        assert!(is_initialized());
        drop(outer);
    }

    #[test]
    fn sockets_outlive_the_last_runtime() {
        let runtime = init().unwrap();
        runtime.end();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();
        assert!(listener.accept().is_ok());
    }
}
