//! Vayu node - threaded MAVLink runtime
//!
//! A [`Node`] runs a set of endpoints (TCP, UDP, serial, custom streams),
//! turns every connected peer into a channel and reports traffic as
//! [`Event`]s:
//!
//! - [`config`]: node configuration, TOML settings files
//! - [`endpoint`]: endpoint kinds and their labels
//! - [`transport`]: byte streams, dialers and listeners underneath channels
//! - [`channel`]: channel handles
//! - [`command`]: COMMAND_LONG / COMMAND_INT requests with ACK correlation
//! - [`node`]: the node itself
//!
//! Wire encoding lives in the `vayu-wire` crate.

pub mod channel;
pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod node;
pub mod transport;

mod heartbeat;
mod shutdown;
mod stream_request;

// Re-export commonly used types
pub use channel::ChannelId;
pub use command::{CommandPayload, CommandRequest, CommandResponse};
pub use config::{HeartbeatConfig, NodeConfig, NodeSettings, StreamRequestConfig, Timeouts};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use node::{Event, Node};
