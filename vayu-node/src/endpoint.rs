//! Endpoints: where channels come from
//!
//! Every endpoint reduces to one of three shapes:
//!
//! | Shape     | Variants                          | Channels                     |
//! |-----------|-----------------------------------|------------------------------|
//! | single    | serial, custom stream, broadcast  | exactly one                  |
//! | dialing   | TCP client, UDP client, custom    | one at a time, redialed      |
//! | accepting | TCP server, UDP server, custom    | one per peer                 |

use crate::error::{Error, Result};
use crate::transport::{
    ByteStream, Dialer, Listener, SerialStream, TcpDialer, UdpBroadcastStream, UdpDialer,
    UdpListener,
};
use std::fmt;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

/// Source of channels for a node
pub enum Endpoint {
    /// Connect to a TCP server, reconnecting when the connection drops
    TcpClient { address: String },
    /// Accept TCP clients
    TcpServer { address: String },
    /// Exchange datagrams with one UDP server
    UdpClient { address: String },
    /// Accept UDP peers, one channel per source address
    UdpServer { address: String },
    /// Send to a broadcast address, receive from anyone
    UdpBroadcast {
        broadcast_address: String,
        /// Defaults to `0.0.0.0` on the broadcast port
        local_address: Option<String>,
    },
    /// Serial port, 8N1
    Serial { device: String, baud: u32 },
    /// Caller-supplied stream
    CustomStream {
        stream: Box<dyn ByteStream>,
        label: String,
    },
    /// Caller-supplied dialer, redialed like a TCP client
    CustomClient {
        dialer: Box<dyn Dialer>,
        label: String,
    },
    /// Caller-supplied listener
    CustomServer {
        listener: Box<dyn Listener>,
        label: String,
    },
}

impl Endpoint {
    pub fn tcp_client(address: impl Into<String>) -> Self {
        Endpoint::TcpClient {
            address: address.into(),
        }
    }

    pub fn tcp_server(address: impl Into<String>) -> Self {
        Endpoint::TcpServer {
            address: address.into(),
        }
    }

    pub fn udp_client(address: impl Into<String>) -> Self {
        Endpoint::UdpClient {
            address: address.into(),
        }
    }

    pub fn udp_server(address: impl Into<String>) -> Self {
        Endpoint::UdpServer {
            address: address.into(),
        }
    }

    pub fn udp_broadcast(broadcast_address: impl Into<String>) -> Self {
        Endpoint::UdpBroadcast {
            broadcast_address: broadcast_address.into(),
            local_address: None,
        }
    }

    pub fn serial(device: impl Into<String>, baud: u32) -> Self {
        Endpoint::Serial {
            device: device.into(),
            baud,
        }
    }

    /// Human-readable name used in logs and channel labels
    pub fn label(&self) -> String {
        match self {
            Endpoint::TcpClient { address } => format!("tcp:{address}"),
            Endpoint::TcpServer { address } => format!("tcp-server:{address}"),
            Endpoint::UdpClient { address } => format!("udp:{address}"),
            Endpoint::UdpServer { address } => format!("udp-server:{address}"),
            Endpoint::UdpBroadcast {
                broadcast_address, ..
            } => format!("udp-broadcast:{broadcast_address}"),
            Endpoint::Serial { device, baud } => format!("serial:{device}@{baud}"),
            Endpoint::CustomStream { label, .. }
            | Endpoint::CustomClient { label, .. }
            | Endpoint::CustomServer { label, .. } => label.clone(),
        }
    }

    /// Open sockets and ports; dialing happens later, on the endpoint thread
    pub(crate) fn open(self) -> Result<EndpointShape> {
        let label = self.label();
        let shape = match self {
            Endpoint::TcpClient { address } => {
                parse_address(&address)?;
                EndpointShape::Dialing {
                    dialer: Box::new(TcpDialer::new(address)),
                    label,
                }
            }
            Endpoint::UdpClient { address } => {
                parse_address(&address)?;
                EndpointShape::Dialing {
                    dialer: Box::new(UdpDialer::new(address)),
                    label,
                }
            }
            Endpoint::TcpServer { address } => {
                let listener = TcpListener::bind(parse_address(&address)?)?;
                log::info!("TCP server listening on {}", listener.local_addr()?);
                EndpointShape::Accepting {
                    listener: Box::new(listener),
                    label,
                }
            }
            Endpoint::UdpServer { address } => EndpointShape::Accepting {
                listener: Box::new(UdpListener::bind(parse_address(&address)?)?),
                label,
            },
            Endpoint::UdpBroadcast {
                broadcast_address,
                local_address,
            } => {
                let broadcast = parse_address(&broadcast_address)?;
                let local = match local_address {
                    Some(a) => parse_address(&a)?,
                    None => SocketAddr::from(([0, 0, 0, 0], broadcast.port())),
                };
                EndpointShape::Single {
                    stream: Box::new(UdpBroadcastStream::bind(broadcast, local)?),
                    label,
                }
            }
            Endpoint::Serial { device, baud } => EndpointShape::Single {
                stream: Box::new(SerialStream::open(&device, baud)?),
                label,
            },
            Endpoint::CustomStream { stream, .. } => EndpointShape::Single {
                stream,
                label,
            },
            Endpoint::CustomClient { dialer, .. } => EndpointShape::Dialing { dialer, label },
            Endpoint::CustomServer { listener, .. } => EndpointShape::Accepting { listener, label },
        };
        Ok(shape)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Endpoint").field(&self.label()).finish()
    }
}

/// What the node runs for an endpoint
///
/// Only channels of `Dialing` and `Accepting` shapes get the read idle
/// timeout; a `Single` stream is never reopened.
pub(crate) enum EndpointShape {
    Single {
        stream: Box<dyn ByteStream>,
        label: String,
    },
    Dialing {
        dialer: Box<dyn Dialer>,
        label: String,
    },
    Accepting {
        listener: Box<dyn Listener>,
        label: String,
    },
}

/// Parse or resolve "host:port"
pub(crate) fn parse_address(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    address
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("127.0.0.1:14550").unwrap(),
            "127.0.0.1:14550".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_address("localhost:14550").is_ok());
        assert!(matches!(
            parse_address("no-port"),
            Err(Error::InvalidAddress(a)) if a == "no-port"
        ));
        assert!(matches!(
            parse_address("127.0.0.1:99999"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_labels() {
        assert_eq!(Endpoint::tcp_client("1.2.3.4:5760").label(), "tcp:1.2.3.4:5760");
        assert_eq!(Endpoint::serial("/dev/ttyACM0", 57600).label(), "serial:/dev/ttyACM0@57600");
        assert_eq!(
            Endpoint::udp_broadcast("192.168.1.255:14550").label(),
            "udp-broadcast:192.168.1.255:14550"
        );
    }

    #[test]
    fn test_open_shapes() {
        assert!(matches!(
            Endpoint::tcp_client("127.0.0.1:1").open().unwrap(),
            EndpointShape::Dialing { .. }
        ));
        assert!(matches!(
            Endpoint::tcp_server("127.0.0.1:0").open().unwrap(),
            EndpointShape::Accepting { .. }
        ));
        assert!(matches!(
            Endpoint::udp_server("127.0.0.1:0").open().unwrap(),
            EndpointShape::Accepting { .. }
        ));
        assert!(matches!(
            Endpoint::udp_client("bad address").open(),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_serial_open_failure_is_error() {
        let result = Endpoint::serial("/dev/does-not-exist-vayu", 57600).open();
        assert!(matches!(result, Err(Error::Serial(_))));
    }
}
