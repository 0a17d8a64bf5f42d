//! UDP client and broadcast streams
//!
//! Each `write` call sends one datagram; the frame writer emits a whole frame
//! per call, so frames map one-to-one onto datagrams.

use super::{ByteStream, DatagramBuffer};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// UDP socket connected to a single remote address
pub struct UdpClientStream {
    socket: UdpSocket,
    pending: DatagramBuffer,
}

impl UdpClientStream {
    /// Bind an ephemeral local port and connect it to `remote`
    pub fn connect(remote: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        log::debug!("UDP client {} -> {}", socket.local_addr()?, remote);
        Ok(Self {
            socket,
            pending: DatagramBuffer::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Read for UdpClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let socket = &self.socket;
            match self.pending.refill(|b| socket.recv(b)) {
                Ok(_) => {}
                // ICMP port unreachable from a peer that is not up yet
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    return Err(io::Error::from(io::ErrorKind::WouldBlock));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.pending.read_into(buf))
    }
}

impl Write for UdpClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.socket.send(buf) {
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(buf.len()),
            other => other,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for UdpClientStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn ByteStream>> {
        Ok(Box::new(Self {
            socket: self.socket.try_clone()?,
            pending: DatagramBuffer::default(),
        }))
    }

    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(read)?;
        self.socket.set_write_timeout(write)
    }
}

/// UDP socket sending to a broadcast address and receiving from anyone
pub struct UdpBroadcastStream {
    socket: UdpSocket,
    broadcast: SocketAddr,
    pending: DatagramBuffer,
}

impl UdpBroadcastStream {
    /// Bind `local` with broadcast enabled; writes go to `broadcast`
    pub fn bind(broadcast: SocketAddr, local: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_broadcast(true)?;
        log::info!(
            "UDP broadcast bound on {} -> {}",
            socket.local_addr()?,
            broadcast
        );
        Ok(Self {
            socket,
            broadcast,
            pending: DatagramBuffer::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Read for UdpBroadcastStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let socket = &self.socket;
            self.pending.refill(|b| socket.recv_from(b).map(|(n, _)| n))?;
        }
        Ok(self.pending.read_into(buf))
    }
}

impl Write for UdpBroadcastStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send_to(buf, self.broadcast)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for UdpBroadcastStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn ByteStream>> {
        Ok(Box::new(Self {
            socket: self.socket.try_clone()?,
            broadcast: self.broadcast,
            pending: DatagramBuffer::default(),
        }))
    }

    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(read)?;
        self.socket.set_write_timeout(write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::POLL_INTERVAL;

    #[test]
    fn test_client_roundtrip() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut client = UdpClientStream::connect(server.local_addr().unwrap()).unwrap();
        client.set_timeouts(Some(Duration::from_secs(2)), None).unwrap();

        client.write_all(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);

        server.send_to(&[9, 8, 7, 6], from).unwrap();
        let mut two = [0u8; 2];
        client.read_exact(&mut two).unwrap();
        assert_eq!(two, [9, 8]);
        client.read_exact(&mut two).unwrap();
        assert_eq!(two, [7, 6]);
    }

    #[test]
    fn test_broadcast_send_and_receive() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut stream =
            UdpBroadcastStream::bind(peer.local_addr().unwrap(), "127.0.0.1:0".parse().unwrap())
                .unwrap();
        stream.set_timeouts(Some(Duration::from_secs(2)), None).unwrap();
        let local = stream.local_addr().unwrap();

        stream.write_all(&[0xFD, 1, 2]).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0xFD, 1, 2]);
        assert_eq!(from, local);

        // datagrams from anyone are read, in order
        let other = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.send_to(&[4, 5], local).unwrap();
        other.send_to(&[6], local).unwrap();
        let mut three = [0u8; 3];
        stream.read_exact(&mut three).unwrap();
        assert_eq!(three, [4, 5, 6]);
    }

    #[test]
    fn test_broadcast_clone_shares_socket() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let stream =
            UdpBroadcastStream::bind(peer.local_addr().unwrap(), "127.0.0.1:0".parse().unwrap())
                .unwrap();
        let mut clone = stream.try_clone_stream().unwrap();
        clone.write_all(&[7]).unwrap();
        let mut buf = [0u8; 4];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[7]);
        assert_eq!(from, stream.local_addr().unwrap());
    }

    #[test]
    fn test_client_read_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut client = UdpClientStream::connect(server.local_addr().unwrap()).unwrap();
        client.set_timeouts(Some(POLL_INTERVAL), None).unwrap();
        let mut buf = [0u8; 4];
        let err = client.read(&mut buf).unwrap_err();
        assert!(crate::transport::is_poll_timeout(&err));
    }
}
