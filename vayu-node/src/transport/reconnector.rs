//! Redials a client endpoint until it connects or the node shuts down

use super::{ByteStream, Dialer};
use crate::shutdown::Shutdown;
use std::time::Duration;

pub(crate) struct Reconnector {
    dialer: Box<dyn Dialer>,
    label: String,
    dial_timeout: Duration,
    retry_interval: Duration,
    shutdown: Shutdown,
}

impl Reconnector {
    pub fn new(
        dialer: Box<dyn Dialer>,
        label: String,
        dial_timeout: Duration,
        retry_interval: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            dialer,
            label,
            dial_timeout,
            retry_interval,
            shutdown,
        }
    }

    /// Block until a stream is open; `None` once the node is shutting down
    pub fn connect(&mut self) -> Option<Box<dyn ByteStream>> {
        let mut attempt = 0u64;
        while !self.shutdown.is_triggered() {
            attempt += 1;
            match self.dialer.dial(self.dial_timeout) {
                Ok(stream) => {
                    log::info!("{}: connected (attempt {})", self.label, attempt);
                    return Some(stream);
                }
                Err(e) => {
                    if attempt == 1 {
                        log::warn!("{}: dial failed: {}", self.label, e);
                    } else {
                        log::debug!("{}: dial attempt {} failed: {}", self.label, attempt, e);
                    }
                    if self.shutdown.wait(self.retry_interval) {
                        break;
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownTrigger;
    use std::io;
    use std::net::TcpStream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    /// Fails `failures` times, then hands out loopback TCP streams
    struct FlakyDialer {
        failures: usize,
        calls: Arc<AtomicUsize>,
        listener: std::net::TcpListener,
    }

    impl Dialer for FlakyDialer {
        fn dial(&mut self, timeout: Duration) -> io::Result<Box<dyn ByteStream>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(io::ErrorKind::ConnectionRefused.into());
            }
            let addr = self.listener.local_addr()?;
            Ok(Box::new(TcpStream::connect_timeout(&addr, timeout)?))
        }
    }

    #[test]
    fn test_retries_until_connected() {
        let trigger = ShutdownTrigger::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let dialer = FlakyDialer {
            failures: 2,
            calls: Arc::clone(&calls),
            listener: std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
        };
        let mut r = Reconnector::new(
            Box::new(dialer),
            "test".into(),
            Duration::from_secs(1),
            Duration::from_millis(20),
            trigger.signal(),
        );
        assert!(r.connect().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_shutdown_stops_retrying() {
        let trigger = ShutdownTrigger::new();
        let dialer = FlakyDialer {
            failures: usize::MAX,
            calls: Arc::new(AtomicUsize::new(0)),
            listener: std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
        };
        let mut r = Reconnector::new(
            Box::new(dialer),
            "test".into(),
            Duration::from_secs(1),
            Duration::from_secs(30),
            trigger.signal(),
        );
        let started = Instant::now();
        let handle = thread::spawn(move || r.connect().is_none());
        thread::sleep(Duration::from_millis(50));
        trigger.trigger();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
