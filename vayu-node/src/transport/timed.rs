//! Deadline-enforcing stream wrapper
//!
//! ```text
//! reader thread ── TimedStream ──┐
//!                                ├── same connection
//! writer thread ── clone ────────┤
//! node close ───── StreamCloser ─┘   (flag + shutdown)
//! ```
//!
//! Reads loop over short poll timeouts. Each poll checks the shared closed
//! flag (returns end-of-file) and the idle deadline (returns `TimedOut`).

use super::{ByteStream, POLL_INTERVAL, is_poll_timeout};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared close switch for every handle of one stream
///
/// Also reports closed once the optional `stop` flag (node shutdown) is set.
#[derive(Clone)]
pub struct StreamCloser {
    closed: Arc<AtomicBool>,
    stop: Option<Arc<AtomicBool>>,
    handle: Arc<Mutex<Option<Box<dyn ByteStream>>>>,
}

impl StreamCloser {
    fn new(handle: Option<Box<dyn ByteStream>>, stop: Option<Arc<AtomicBool>>) -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            stop,
            handle: Arc::new(Mutex::new(handle)),
        }
    }

    /// Close the stream; idempotent
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().take()
            && let Err(e) = handle.shutdown()
        {
            log::debug!("Stream shutdown failed: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.stop.as_ref().is_some_and(|s| s.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for StreamCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCloser")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read half of a channel stream with an idle deadline
pub struct TimedStream {
    inner: Box<dyn ByteStream>,
    idle_timeout: Option<Duration>,
    closer: StreamCloser,
}

impl TimedStream {
    /// Split a stream into a timed reader, a writer handle and a closer
    ///
    /// `idle_timeout` bounds the time between received bytes (`None` for
    /// streams that are routinely idle, like broadcast sockets).
    /// `write_timeout` bounds a single write. Reads end as if closed once
    /// `stop` is set.
    pub fn split(
        mut stream: Box<dyn ByteStream>,
        idle_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        stop: Option<Arc<AtomicBool>>,
    ) -> io::Result<(Self, Box<dyn ByteStream>, StreamCloser)> {
        stream.set_timeouts(Some(POLL_INTERVAL), write_timeout)?;
        let writer = stream.try_clone_stream()?;
        let closer = StreamCloser::new(stream.try_clone_stream().ok(), stop);
        let reader = Self {
            inner: stream,
            idle_timeout,
            closer: closer.clone(),
        };
        Ok((reader, writer, closer))
    }

    pub fn closer(&self) -> &StreamCloser {
        &self.closer
    }
}

impl Read for TimedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let started = Instant::now();
        loop {
            if self.closer.is_closed() {
                return Ok(0);
            }
            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if is_poll_timeout(&e) => {
                    if let Some(limit) = self.idle_timeout
                        && started.elapsed() >= limit
                    {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no data for {:?}", limit),
                        ));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_idle_deadline() {
        let (client, _server) = tcp_pair();
        let (mut reader, _writer, _closer) =
            TimedStream::split(Box::new(client), Some(Duration::from_millis(300)), None, None)
                .unwrap();

        let started = Instant::now();
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_data_passes_through() {
        let (client, mut server) = tcp_pair();
        let (mut reader, mut writer, _closer) =
            TimedStream::split(Box::new(client), Some(Duration::from_secs(5)), None, None).unwrap();

        server.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        writer.write_all(b"pong").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_close_unblocks_reader() {
        let (client, _server) = tcp_pair();
        let (mut reader, _writer, closer) =
            TimedStream::split(Box::new(client), None, None, None).unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(150));
        closer.close();
        closer.close();

        let n = handle.join().unwrap().unwrap();
        assert_eq!(n, 0);
        assert!(closer.is_closed());
    }

    #[test]
    fn test_stop_flag_ends_reads() {
        let (client, _server) = tcp_pair();
        let stop = Arc::new(AtomicBool::new(false));
        let (mut reader, _writer, closer) =
            TimedStream::split(Box::new(client), None, None, Some(Arc::clone(&stop))).unwrap();

        assert!(!closer.is_closed());
        stop.store(true, Ordering::SeqCst);
        assert!(closer.is_closed());
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
