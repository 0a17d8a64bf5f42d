//! Error types for vayu-node

use crate::channel::ChannelId;
use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Node error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame or message codec error
    #[error("Wire error: {0}")]
    Wire(#[from] vayu_wire::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Configuration rejected at node construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Endpoint address could not be parsed or resolved
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Operation needs a dialect message that is not loaded
    #[error("Dialect does not provide {0}")]
    DialectMissing(&'static str),

    /// Read or write deadline exceeded
    #[error("I/O timeout")]
    IoTimeout,

    /// Stream closed by the peer
    #[error("I/O closed")]
    IoClosed,

    /// Node is closing or closed
    #[error("Node terminated")]
    Terminated,

    /// No open channel with this id
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// Command not acknowledged in time
    #[error("Command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// Command abandoned because its channel or the node closed
    #[error("Command cancelled")]
    CommandCancelled,

    /// Command request has no target system
    #[error("Command target missing")]
    CommandTargetMissing,

    /// Same command already pending for the same target on the same channel
    #[error("Command already in flight")]
    CommandInFlight,
}

impl Error {
    /// Classify an I/O failure that ended a channel
    pub(crate) fn from_stream(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::IoTimeout,
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Error::IoClosed,
            _ => Error::Io(e),
        }
    }
}
