//! Node configuration
//!
//! [`NodeConfig`] is what [`Node::new`](crate::Node::new) takes. It can be
//! built in code, or loaded from TOML through [`NodeSettings`], which covers
//! every option except custom endpoints and the dialect:
//!
//! ```toml
//! version = "v2"
//! system_id = 255
//!
//! [heartbeat]
//! period_ms = 1000
//!
//! [[endpoints]]
//! type = "udp_server"
//! address = "0.0.0.0:14550"
//! ```

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vayu_wire::dialects::common::{mav_autopilot, mav_state, mav_type};
use vayu_wire::{Dialect, SigningKey, Version};

/// Everything a node needs
#[derive(Debug)]
pub struct NodeConfig {
    /// Messages to decode and encode; without one, frames carry raw payloads
    pub dialect: Option<Arc<Dialect>>,
    /// Version of authored frames
    pub version: Version,
    /// System id of authored frames, non-zero
    pub system_id: u8,
    /// Component id of authored frames
    pub component_id: u8,
    /// Require incoming frames to be signed with this key
    pub inbound_key: Option<SigningKey>,
    /// Sign authored frames with this key (v2 only)
    pub outbound_key: Option<SigningKey>,
    /// Link id written into signatures
    pub signature_link_id: u8,
    pub heartbeat: HeartbeatConfig,
    pub stream_request: StreamRequestConfig,
    pub timeouts: Timeouts,
    /// Depth of every internal queue (events, control, channel mailboxes)
    pub queue_capacity: usize,
    /// At least one
    pub endpoints: Vec<Endpoint>,
}

impl NodeConfig {
    pub fn new(version: Version, system_id: u8, endpoints: Vec<Endpoint>) -> Self {
        Self {
            dialect: None,
            version,
            system_id,
            component_id: default_component_id(),
            inbound_key: None,
            outbound_key: None,
            signature_link_id: 0,
            heartbeat: HeartbeatConfig::default(),
            stream_request: StreamRequestConfig::default(),
            timeouts: Timeouts::default(),
            queue_capacity: default_queue_capacity(),
            endpoints,
        }
    }

    pub fn with_dialect(mut self, dialect: Arc<Dialect>) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_component_id(mut self, component_id: u8) -> Self {
        self.component_id = component_id;
        self
    }

    pub fn with_inbound_key(mut self, key: SigningKey) -> Self {
        self.inbound_key = Some(key);
        self
    }

    pub fn with_outbound_key(mut self, key: SigningKey, link_id: u8) -> Self {
        self.outbound_key = Some(key);
        self.signature_link_id = link_id;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_stream_request(mut self, stream_request: StreamRequestConfig) -> Self {
        self.stream_request = stream_request;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Reject configurations the node cannot run
    pub fn validate(&self) -> Result<()> {
        if self.system_id == 0 {
            return Err(Error::InvalidConfig("system id must be at least 1".into()));
        }
        if self.endpoints.is_empty() {
            return Err(Error::InvalidConfig("at least one endpoint is required".into()));
        }
        if self.outbound_key.is_some() && self.version == Version::V1 {
            return Err(Error::InvalidConfig(
                "an outbound signing key requires version v2".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue capacity must be non-zero".into()));
        }
        if self.heartbeat.enabled && self.heartbeat.period.is_zero() {
            return Err(Error::InvalidConfig("heartbeat period must be non-zero".into()));
        }
        if self.stream_request.enabled && self.stream_request.frequency_hz == 0 {
            return Err(Error::InvalidConfig(
                "stream request frequency must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Periodic HEARTBEAT emission
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    #[serde(rename = "period_ms", with = "duration_ms")]
    pub period: Duration,
    /// MAV_TYPE of this node
    pub system_type: u8,
    /// MAV_AUTOPILOT of this node
    pub autopilot: u8,
    pub base_mode: u8,
    pub custom_mode: u32,
    /// MAV_STATE of this node
    pub system_status: u8,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: Duration::from_secs(5),
            system_type: mav_type::GCS as u8,
            autopilot: mav_autopilot::GENERIC as u8,
            base_mode: 0,
            custom_mode: 0,
            system_status: mav_state::ACTIVE as u8,
        }
    }
}

/// REQUEST_DATA_STREAM handshake with autopilots that need it
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamRequestConfig {
    pub enabled: bool,
    /// Requested rate for every stream
    pub frequency_hz: u16,
    /// MAV_AUTOPILOT values that trigger requests
    pub autopilots: Vec<u8>,
}

impl Default for StreamRequestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency_hz: 4,
            autopilots: vec![mav_autopilot::ARDUPILOTMEGA as u8],
        }
    }
}

/// Deadlines used by channels, endpoints and commands
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Timeouts {
    /// Channel closes after this long without incoming bytes
    #[serde(rename = "read_ms", with = "duration_ms")]
    pub read: Duration,
    /// Bound on a single write
    #[serde(rename = "write_ms", with = "duration_ms")]
    pub write: Duration,
    /// Bound on a single connection attempt
    #[serde(rename = "dial_ms", with = "duration_ms")]
    pub dial: Duration,
    /// Wait between connection attempts
    #[serde(rename = "reconnect_ms", with = "duration_ms")]
    pub reconnect: Duration,
    /// Default command acknowledgement timeout
    #[serde(rename = "command_ms", with = "duration_ms")]
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(60),
            write: Duration::from_secs(10),
            dial: Duration::from_secs(10),
            reconnect: Duration::from_secs(2),
            command: Duration::from_secs(5),
        }
    }
}

/// File form of [`NodeConfig`]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeSettings {
    pub version: Version,
    pub system_id: u8,
    #[serde(default = "default_component_id")]
    pub component_id: u8,
    /// 64 hex characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_key: Option<String>,
    /// 64 hex characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_key: Option<String>,
    #[serde(default)]
    pub signature_link_id: u8,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub stream_request: StreamRequestConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub endpoints: Vec<EndpointSettings>,
}

/// File form of the address-based [`Endpoint`] variants
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointSettings {
    TcpClient {
        address: String,
    },
    TcpServer {
        address: String,
    },
    UdpClient {
        address: String,
    },
    UdpServer {
        address: String,
    },
    UdpBroadcast {
        broadcast_address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_address: Option<String>,
    },
    Serial {
        device: String,
        baud: u32,
    },
}

impl From<EndpointSettings> for Endpoint {
    fn from(settings: EndpointSettings) -> Self {
        match settings {
            EndpointSettings::TcpClient { address } => Endpoint::TcpClient { address },
            EndpointSettings::TcpServer { address } => Endpoint::TcpServer { address },
            EndpointSettings::UdpClient { address } => Endpoint::UdpClient { address },
            EndpointSettings::UdpServer { address } => Endpoint::UdpServer { address },
            EndpointSettings::UdpBroadcast {
                broadcast_address,
                local_address,
            } => Endpoint::UdpBroadcast {
                broadcast_address,
                local_address,
            },
            EndpointSettings::Serial { device, baud } => Endpoint::Serial { device, baud },
        }
    }
}

impl NodeSettings {
    /// Load settings from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use vayu_node::config::NodeSettings;
    ///
    /// let settings = NodeSettings::from_file("vayu.toml")?;
    /// let config = settings.into_config(Some(vayu_wire::dialects::common::dialect().into()))?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save settings to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Build a node configuration; keys are decoded here
    pub fn into_config(self, dialect: Option<Arc<Dialect>>) -> Result<NodeConfig> {
        let inbound_key = self.inbound_key.as_deref().map(parse_key).transpose()?;
        let outbound_key = self.outbound_key.as_deref().map(parse_key).transpose()?;
        Ok(NodeConfig {
            dialect,
            version: self.version,
            system_id: self.system_id,
            component_id: self.component_id,
            inbound_key,
            outbound_key,
            signature_link_id: self.signature_link_id,
            heartbeat: self.heartbeat,
            stream_request: self.stream_request,
            timeouts: self.timeouts,
            queue_capacity: self.queue_capacity,
            endpoints: self.endpoints.into_iter().map(Endpoint::from).collect(),
        })
    }
}

/// Decode a 32-byte key written as 64 hex characters
pub fn parse_key(hex: &str) -> Result<SigningKey> {
    let hex = hex.trim();
    if hex.len() != 64 || !hex.is_ascii() {
        return Err(Error::InvalidConfig(
            "signing key must be 64 hex characters".into(),
        ));
    }
    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
            .map_err(|_| Error::InvalidConfig(format!("invalid hex in signing key at {}", 2 * i)))?;
    }
    Ok(SigningKey::new(key))
}

/// Inverse of [`parse_key`]
pub fn key_to_hex(key: &SigningKey) -> String {
    key.as_bytes().iter().map(|b| format!("{b:02x}")).collect()
}

fn default_component_id() -> u8 {
    1
}

fn default_queue_capacity() -> usize {
    512
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
