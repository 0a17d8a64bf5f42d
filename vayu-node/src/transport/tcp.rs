//! TCP dialer and listener, UDP dialer

use super::{ByteStream, Dialer, Listener, UdpClientStream};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

/// Resolve "host:port" to its first address
pub(crate) fn resolve(address: &str) -> io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{address} resolves to no address"),
        )
    })
}

/// Dials a TCP server; the address is re-resolved on every attempt
#[derive(Debug, Clone)]
pub struct TcpDialer {
    address: String,
}

impl TcpDialer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Dialer for TcpDialer {
    fn dial(&mut self, timeout: Duration) -> io::Result<Box<dyn ByteStream>> {
        let addr = resolve(&self.address)?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// "Dials" a UDP peer by connecting an ephemeral socket to it
#[derive(Debug, Clone)]
pub struct UdpDialer {
    address: String,
}

impl UdpDialer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Dialer for UdpDialer {
    fn dial(&mut self, _timeout: Duration) -> io::Result<Box<dyn ByteStream>> {
        let addr = resolve(&self.address)?;
        Ok(Box::new(UdpClientStream::connect(addr)?))
    }
}

// Accepting is polled so the endpoint thread can observe node shutdown
impl Listener for TcpListener {
    fn accept(&mut self, poll: Duration) -> io::Result<Option<(Box<dyn ByteStream>, String)>> {
        self.set_nonblocking(true)?;
        match TcpListener::accept(self) {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                Ok(Some((Box::new(stream), peer.to_string())))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(poll);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve("127.0.0.1:5760").unwrap(),
            "127.0.0.1:5760".parse::<SocketAddr>().unwrap()
        );
        assert!(resolve("not an address").is_err());
    }

    #[test]
    fn test_tcp_dial_and_accept() {
        let mut listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut dialer = TcpDialer::new(addr.to_string());
        let mut client = dialer.dial(Duration::from_secs(2)).unwrap();

        let mut accepted = None;
        for _ in 0..50 {
            if let Some(pair) = Listener::accept(&mut listener, Duration::from_millis(20)).unwrap() {
                accepted = Some(pair);
                break;
            }
        }
        let (mut server, peer) = accepted.unwrap();
        assert!(peer.starts_with("127.0.0.1:"));

        client.write_all(b"abc").unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_tcp_dial_refused() {
        // bind then drop to get a port with nothing listening
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut dialer = TcpDialer::new(addr.to_string());
        assert!(dialer.dial(Duration::from_millis(500)).is_err());
    }
}
