//! Transport layer: byte streams underneath channels
//!
//! Every channel owns one [`ByteStream`]. The channel reader uses the stream
//! itself (wrapped in a [`TimedStream`]); the channel writer uses a second
//! handle obtained from [`ByteStream::try_clone_stream`].
//!
//! Blocking reads are bounded by a short poll interval so that readers can
//! notice channel close and idle deadlines without relying on the platform
//! to interrupt a blocked call.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

mod reconnector;
mod serial;
mod tcp;
mod timed;
mod udp;
mod udp_listener;

pub(crate) use reconnector::Reconnector;
pub use serial::SerialStream;
pub use tcp::{TcpDialer, UdpDialer};
pub use timed::{StreamCloser, TimedStream};
pub use udp::{UdpBroadcastStream, UdpClientStream};
pub use udp_listener::{UdpListener, UdpPeerStream};

/// Upper bound on a single blocking read
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bidirectional byte stream owned by a channel
pub trait ByteStream: Read + Write + Send {
    /// Second handle to the same stream, used by the channel writer
    fn try_clone_stream(&self) -> io::Result<Box<dyn ByteStream>>;

    /// Bound single blocking reads and writes
    ///
    /// A read that hits the bound returns `WouldBlock` or `TimedOut`.
    fn set_timeouts(&mut self, _read: Option<Duration>, _write: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Unblock every handle to this stream
    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for TcpStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn ByteStream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(read)?;
        self.set_write_timeout(write)
    }

    fn shutdown(&self) -> io::Result<()> {
        match TcpStream::shutdown(self, std::net::Shutdown::Both) {
            // already disconnected
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl ByteStream for Box<dyn ByteStream> {
    fn try_clone_stream(&self) -> io::Result<Box<dyn ByteStream>> {
        (**self).try_clone_stream()
    }

    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        (**self).set_timeouts(read, write)
    }

    fn shutdown(&self) -> io::Result<()> {
        (**self).shutdown()
    }
}

/// Opens a fresh byte stream on demand (client endpoints)
pub trait Dialer: Send {
    /// Connect once, giving up after `timeout`
    fn dial(&mut self, timeout: Duration) -> io::Result<Box<dyn ByteStream>>;
}

/// Yields one byte stream per accepted peer (server endpoints)
pub trait Listener: Send {
    /// Wait up to `poll` for a peer; returns the stream and a peer label
    fn accept(&mut self, poll: Duration) -> io::Result<Option<(Box<dyn ByteStream>, String)>>;

    /// Stop accepting
    fn close(&mut self) {}
}

/// Whether a read error only means "no data within the poll interval"
pub(crate) fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Serves a byte stream out of received datagrams
///
/// MAVLink frames never span datagrams, but a reader may ask for fewer bytes
/// than a datagram holds; the remainder is kept for the next call.
#[derive(Debug, Default)]
pub(crate) struct DatagramBuffer {
    buf: Vec<u8>,
    pos: usize,
}

impl DatagramBuffer {
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Replace the contents with an owned datagram
    pub fn replace(&mut self, datagram: Vec<u8>) {
        self.buf = datagram;
        self.pos = 0;
    }

    /// Receive one datagram into the internal buffer
    pub fn refill<F>(&mut self, recv: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        self.buf.resize(MAX_DATAGRAM, 0);
        self.pos = 0;
        match recv(&mut self.buf) {
            Ok(n) => {
                self.buf.truncate(n);
                Ok(n)
            }
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
        }
    }

    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Largest UDP payload
pub(crate) const MAX_DATAGRAM: usize = 65_535;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_buffer_partial_reads() {
        let mut b = DatagramBuffer::default();
        assert!(b.is_empty());
        b.replace(vec![1, 2, 3, 4, 5]);

        let mut out = [0u8; 2];
        assert_eq!(b.read_into(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(b.read_into(&mut out), 2);
        assert_eq!(out, [3, 4]);

        let mut big = [0u8; 8];
        assert_eq!(b.read_into(&mut big), 1);
        assert_eq!(big[0], 5);
        assert!(b.is_empty());
    }

    #[test]
    fn test_datagram_buffer_refill() {
        let mut b = DatagramBuffer::default();
        let n = b
            .refill(|buf| {
                buf[..3].copy_from_slice(&[7, 8, 9]);
                Ok(3)
            })
            .unwrap();
        assert_eq!(n, 3);
        let mut out = [0u8; 8];
        assert_eq!(b.read_into(&mut out), 3);
        assert_eq!(&out[..3], &[7, 8, 9]);

        assert!(b.refill(|_| Err(io::ErrorKind::WouldBlock.into())).is_err());
        assert!(b.is_empty());
    }

    #[test]
    fn test_poll_timeout_kinds() {
        assert!(is_poll_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_poll_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_poll_timeout(&io::Error::from(io::ErrorKind::UnexpectedEof)));
    }
}
