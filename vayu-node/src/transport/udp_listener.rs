//! Connection-oriented view of a UDP server socket
//!
//! ```text
//!                 ┌──────────────┐   peer A queue   ┌───────────────┐
//! UDP socket ───> │ demux thread │ ───────────────> │ UdpPeerStream │
//!  recv_from      │ (peer → tx)  │ ───────────────> │ UdpPeerStream │
//!                 └──────┬───────┘   peer B queue   └───────────────┘
//!                        │ first datagram from a new peer
//!                        v
//!                  accept queue ──> UdpListener::accept
//! ```
//!
//! A peer is keyed by its source address. Its stream ends when it is shut
//! down or the listener closes; a later datagram from the same address then
//! starts a new stream.

use super::{ByteStream, DatagramBuffer, Listener, MAX_DATAGRAM, POLL_INTERVAL, is_poll_timeout};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Datagrams buffered per peer before new ones are dropped
const PEER_QUEUE_DEPTH: usize = 256;

/// Peers waiting in the accept queue
const ACCEPT_QUEUE_DEPTH: usize = 64;

struct PeerEntry {
    generation: u64,
    tx: Sender<Vec<u8>>,
}

type PeerMap = Arc<Mutex<HashMap<SocketAddr, PeerEntry>>>;

/// UDP server socket demultiplexed into one stream per peer address
pub struct UdpListener {
    local: SocketAddr,
    peers: PeerMap,
    accepted: Receiver<UdpPeerStream>,
    closed: Arc<AtomicBool>,
    demux: Option<JoinHandle<()>>,
}

impl UdpListener {
    pub fn bind(address: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(address)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local = socket.local_addr()?;
        let socket = Arc::new(socket);

        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (accept_tx, accepted) = bounded(ACCEPT_QUEUE_DEPTH);

        let demux = {
            let socket = Arc::clone(&socket);
            let peers = Arc::clone(&peers);
            let closed = Arc::clone(&closed);
            thread::Builder::new()
                .name("udp-listener".to_string())
                .spawn(move || demux_loop(socket, peers, accept_tx, closed))?
        };

        log::info!("UDP server listening on {}", local);
        Ok(Self {
            local,
            peers,
            accepted,
            closed,
            demux: Some(demux),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Number of peers with an open stream
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

impl Listener for UdpListener {
    fn accept(&mut self, poll: Duration) -> io::Result<Option<(Box<dyn ByteStream>, String)>> {
        match self.accepted.recv_timeout(poll) {
            Ok(stream) => {
                let peer = stream.peer.to_string();
                Ok(Some((Box::new(stream), peer)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "UDP listener closed",
            )),
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.demux.take()
            && handle.join().is_err()
        {
            log::error!("UDP listener thread panicked");
        }
        // ends every peer stream
        self.peers.lock().clear();
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        Listener::close(self);
    }
}

fn demux_loop(
    socket: Arc<UdpSocket>,
    peers: PeerMap,
    accept_tx: Sender<UdpPeerStream>,
    closed: Arc<AtomicBool>,
) {
    let generations = AtomicU64::new(0);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while !closed.load(Ordering::SeqCst) {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if is_poll_timeout(&e) => continue,
            // ICMP errors for earlier sends surface here on some platforms
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                log::error!("UDP server receive failed: {}", e);
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        };
        let datagram = buf[..n].to_vec();

        let mut map = peers.lock();
        if let Some(entry) = map.get(&peer) {
            match entry.tx.try_send(datagram) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => {
                    log::debug!("UDP peer {} queue full, dropping datagram", peer);
                    continue;
                }
                Err(TrySendError::Disconnected(d)) => {
                    // stream dropped without shutdown; start over
                    map.remove(&peer);
                    accept_new_peer(&socket, &peers, &mut map, &accept_tx, &generations, peer, d);
                }
            }
        } else {
            accept_new_peer(&socket, &peers, &mut map, &accept_tx, &generations, peer, datagram);
        }
    }
    log::debug!("UDP listener thread exiting");
}

fn accept_new_peer(
    socket: &Arc<UdpSocket>,
    peers: &PeerMap,
    map: &mut HashMap<SocketAddr, PeerEntry>,
    accept_tx: &Sender<UdpPeerStream>,
    generations: &AtomicU64,
    peer: SocketAddr,
    first: Vec<u8>,
) {
    let (tx, rx) = bounded(PEER_QUEUE_DEPTH);
    // the first datagram always fits in an empty queue
    let _ = tx.try_send(first);

    let generation = generations.fetch_add(1, Ordering::Relaxed);
    let stream = UdpPeerStream {
        socket: Arc::clone(socket),
        peer,
        rx,
        pending: DatagramBuffer::default(),
        read_timeout: None,
        closed: Arc::new(AtomicBool::new(false)),
        generation,
        peers: Arc::clone(peers),
    };
    match accept_tx.try_send(stream) {
        Ok(()) => {
            log::debug!("UDP peer {} accepted", peer);
            map.insert(peer, PeerEntry { generation, tx });
        }
        Err(_) => log::warn!("UDP accept queue full, ignoring peer {}", peer),
    }
}

/// Stream of datagrams exchanged with one peer of a [`UdpListener`]
pub struct UdpPeerStream {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    rx: Receiver<Vec<u8>>,
    pending: DatagramBuffer,
    read_timeout: Option<Duration>,
    closed: Arc<AtomicBool>,
    generation: u64,
    peers: PeerMap,
}

impl UdpPeerStream {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Read for UdpPeerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            let datagram = match self.read_timeout {
                Some(t) => self.rx.recv_timeout(t).map_err(|e| match e {
                    RecvTimeoutError::Timeout => io::Error::from(io::ErrorKind::WouldBlock),
                    RecvTimeoutError::Disconnected => io::Error::from(io::ErrorKind::UnexpectedEof),
                }),
                None => self
                    .rx
                    .recv()
                    .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof)),
            };
            match datagram {
                Ok(d) => self.pending.replace(d),
                // listener dropped this peer
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(e),
            }
        }
        Ok(self.pending.read_into(buf))
    }
}

impl Write for UdpPeerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.socket.send_to(buf, self.peer)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for UdpPeerStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn ByteStream>> {
        Ok(Box::new(Self {
            socket: Arc::clone(&self.socket),
            peer: self.peer,
            rx: self.rx.clone(),
            pending: DatagramBuffer::default(),
            read_timeout: self.read_timeout,
            closed: Arc::clone(&self.closed),
            generation: self.generation,
            peers: Arc::clone(&self.peers),
        }))
    }

    fn set_timeouts(&mut self, read: Option<Duration>, _write: Option<Duration>) -> io::Result<()> {
        self.read_timeout = read;
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut map = self.peers.lock();
        if map.get(&self.peer).is_some_and(|e| e.generation == self.generation) {
            map.remove(&self.peer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_one(listener: &mut UdpListener) -> (Box<dyn ByteStream>, String) {
        for _ in 0..50 {
            if let Some(pair) = listener.accept(Duration::from_millis(50)).unwrap() {
                return pair;
            }
        }
        panic!("no peer accepted");
    }

    #[test]
    fn test_peers_get_separate_streams() {
        let mut listener = UdpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server = listener.local_addr();

        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.send_to(b"from-a", server).unwrap();
        let (mut sa, label_a) = accept_one(&mut listener);
        b.send_to(b"from-b", server).unwrap();
        let (mut sb, label_b) = accept_one(&mut listener);

        assert_eq!(label_a, a.local_addr().unwrap().to_string());
        assert_eq!(label_b, b.local_addr().unwrap().to_string());
        assert_eq!(listener.peer_count(), 2);

        let mut buf = [0u8; 6];
        sa.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"from-a");
        sb.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"from-b");

        // replies go back to the right peer
        sb.write_all(b"to-b").unwrap();
        let mut reply = [0u8; 16];
        b.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let (n, from) = b.recv_from(&mut reply).unwrap();
        assert_eq!(&reply[..n], b"to-b");
        assert_eq!(from, server);
    }

    #[test]
    fn test_shutdown_ends_stream_and_frees_peer() {
        let mut listener = UdpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server = listener.local_addr();
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();

        a.send_to(b"x", server).unwrap();
        let (mut stream, _) = accept_one(&mut listener);
        let mut one = [0u8; 1];
        stream.read_exact(&mut one).unwrap();

        stream.shutdown().unwrap();
        assert_eq!(stream.read(&mut one).unwrap(), 0);
        assert_eq!(listener.peer_count(), 0);

        // the same address comes back as a new peer
        a.send_to(b"y", server).unwrap();
        let (mut again, _) = accept_one(&mut listener);
        again.read_exact(&mut one).unwrap();
        assert_eq!(&one, b"y");
    }

    #[test]
    fn test_read_timeout_is_poll_timeout() {
        let mut listener = UdpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.send_to(b"z", listener.local_addr()).unwrap();
        let (mut stream, _) = accept_one(&mut listener);
        stream.set_timeouts(Some(Duration::from_millis(20)), None).unwrap();

        let mut one = [0u8; 1];
        stream.read_exact(&mut one).unwrap();
        let err = stream.read(&mut one).unwrap_err();
        assert!(is_poll_timeout(&err));
    }
}
