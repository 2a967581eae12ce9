use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::{is_timeout, Error, Result};

/// Outcome of a [`drain`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Every byte read, in arrival order.
    pub data: Vec<u8>,
    /// Whether the reader reported end of stream.
    pub eof: bool,
}

/// Reads `chunk_size` chunks until a read comes back short, then joins them.
///
/// The drain stops on the first read returning fewer than `chunk_size`
/// bytes, on end of stream, or on a timeout once some data was collected.
/// A timeout before any byte is returned to the caller as an error.
pub fn drain<R: Read + ?Sized>(reader: &mut R, chunk_size: usize) -> io::Result<Drained> {
    if chunk_size == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "chunk size must be positive"));
    }

    let mut chunks: VecDeque<Vec<u8>> = VecDeque::new();
    let mut chunk = vec![0u8; chunk_size];
    let mut total = 0;
    let mut eof = false;

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                eof = true;
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if total > 0 && is_timeout(&e) => break,
            Err(e) => return Err(e),
        };
        chunks.push_back(chunk[..n].to_vec());
        total += n;
        if n < chunk_size {
            break;
        }
    }

    let mut data = Vec::with_capacity(total);
    while let Some(c) = chunks.pop_front() {
        data.extend_from_slice(&c);
    }
    log::trace!("Drained {total} bytes in chunks of {chunk_size}, eof: {eof}");
    Ok(Drained { data, eof })
}

/// Performs a single read that must fill `buf` exactly.
///
/// One byte past `buf` is requested so an oversized message is reported
/// instead of being truncated silently. The rest of an oversized message
/// stays in the reader; socket receives discard it afterwards.
pub fn read_fixed<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut scratch = vec![0u8; buf.len() + 1];
    let n = loop {
        match reader.read(&mut scratch) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from_transfer(e)),
        }
    };
    if n == 0 {
        return Err(Error::Disconnected);
    }
    if n > buf.len() {
        return Err(Error::Oversized { capacity: buf.len() });
    }
    if n < buf.len() {
        return Err(Error::ShortRead { expected: buf.len(), got: n });
    }
    buf.copy_from_slice(&scratch[..n]);
    Ok(n)
}

const DISCARD_WAIT: Duration = Duration::from_millis(5);

/// Throws away whatever the peer already sent, returning the byte count.
///
/// Reads until the socket has nothing more within a short wait, then puts
/// the previous receive timeout back.
pub(crate) fn discard_pending(stream: &TcpStream) -> io::Result<usize> {
    let previous = stream.read_timeout()?;
    stream.set_read_timeout(Some(DISCARD_WAIT))?;
    let mut reader = stream;
    let mut scratch = [0u8; 1024];
    let mut discarded = 0;
    let result = loop {
        match reader.read(&mut scratch) {
            Ok(0) => break Ok(discarded),
            Ok(n) => discarded += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => break Ok(discarded),
            Err(e) => break Err(e),
        }
    };
    stream.set_read_timeout(previous)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out pre-arranged read sizes, then a final result.
    struct Scripted {
        data: Vec<u8>,
        pos: usize,
        sizes: VecDeque<usize>,
        tail: Option<io::ErrorKind>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.sizes.pop_front() {
                Some(n) => {
                    let n = n.min(buf.len()).min(self.data.len() - self.pos);
                    buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
                    self.pos += n;
                    Ok(n)
                }
                None => match self.tail {
                    Some(kind) => Err(io::Error::from(kind)),
                    None => Ok(0),
                },
            }
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn stops_on_short_read() {
        let bytes = pattern(3000);
        let mut reader = Cursor::new(bytes.clone());
        let drained = drain(&mut reader, 1024).unwrap();
        assert_eq!(drained.data, bytes);
        assert!(!drained.eof);
    }

    #[test]
    fn exact_multiple_of_chunk_ends_on_eof() {
        let bytes = pattern(2048);
        let drained = drain(&mut Cursor::new(bytes.clone()), 1024).unwrap();
        assert_eq!(drained.data, bytes);
        assert!(drained.eof);
    }

    #[test]
    fn empty_stream_reports_eof_without_data() {
        let drained = drain(&mut Cursor::new(Vec::new()), 1024).unwrap();
        assert!(drained.data.is_empty());
        assert!(drained.eof);
    }

    #[test]
    fn leftover_after_short_read_is_untouched() {
        let bytes = pattern(100);
        let mut reader = Scripted {
            data: bytes.clone(),
            pos: 0,
            sizes: VecDeque::from(vec![16, 16, 10, 16, 16, 16, 10]),
            tail: None,
        };
        let drained = drain(&mut reader, 16).unwrap();
        assert_eq!(drained.data, &bytes[..42]);
        let rest = drain(&mut reader, 16).unwrap();
        assert_eq!(rest.data, &bytes[42..]);
    }

    #[test]
    fn timeout_after_data_returns_what_arrived() {
        let bytes = pattern(32);
        let mut reader = Scripted {
            data: bytes.clone(),
            pos: 0,
            sizes: VecDeque::from(vec![16, 16]),
            tail: Some(io::ErrorKind::WouldBlock),
        };
        let drained = drain(&mut reader, 16).unwrap();
        assert_eq!(drained.data, bytes);
        assert!(!drained.eof);
    }

    #[test]
    fn timeout_before_data_is_an_error() {
        let mut reader = Scripted {
            data: Vec::new(),
            pos: 0,
            sizes: VecDeque::new(),
            tail: Some(io::ErrorKind::TimedOut),
        };
        let err = drain(&mut reader, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = drain(&mut Cursor::new(vec![1u8]), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn fixed_read_fills_the_buffer() {
        let mut buf = [0u8; 5];
        assert_eq!(read_fixed(&mut Cursor::new(b"hello".to_vec()), &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn fixed_read_reports_oversized_messages() {
        let mut buf = [0u8; 4];
        let err = read_fixed(&mut Cursor::new(b"hello".to_vec()), &mut buf).unwrap_err();
        assert!(matches!(err, Error::Oversized { capacity: 4 }));
        assert_eq!(buf, [0u8; 4]);
    }

    #[test]
    fn fixed_read_reports_short_and_closed_reads() {
        let mut buf = [0u8; 8];
        let err = read_fixed(&mut Cursor::new(b"hi".to_vec()), &mut buf).unwrap_err();
        assert!(matches!(err, Error::ShortRead { expected: 8, got: 2 }));

        let err = read_fixed(&mut Cursor::new(Vec::new()), &mut buf).unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }

    #[test]
    fn discard_empties_the_socket_and_keeps_the_timeout() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let timeout = Some(Duration::from_secs(3));
        server.set_read_timeout(timeout).unwrap();

        client.write_all(b"twenty bytes of data").unwrap();
        let mut buf = [0u8; 10];
        let err = read_fixed(&mut &server, &mut buf).unwrap_err();
        assert!(matches!(err, Error::Oversized { capacity: 10 }));
        assert_eq!(discard_pending(&server).unwrap(), 9);
        assert_eq!(server.read_timeout().unwrap(), timeout);

        client.write_all(b"NEXT").unwrap();
        let drained = drain(&mut &server, 16).unwrap();
        assert_eq!(drained.data, b"NEXT");
    }
}
