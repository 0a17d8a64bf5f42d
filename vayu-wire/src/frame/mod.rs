//! MAVLink v1/v2 frames
//!
//! # Wire format
//!
//! ```text
//! v1:  FE | len | seq | sys | comp | id           | payload | crc16
//! v2:  FD | len | incompat | compat | seq | sys | comp | id(3, LE) | payload | crc16
//!      [ link | timestamp(6, LE) | signature(6) ]   when incompat & 0x01
//! ```
//!
//! The checksum is X.25 over everything after the magic byte up to the end of
//! the payload, followed by the message's CRC-extra byte.

mod reader;
mod signing;
mod writer;

pub use reader::FrameReader;
pub use signing::{
    FrameSigner, SIGNATURE_EPOCH_UNIX_SECS, SIGNATURE_REPLAY_WINDOW, SigningKey,
    compute_signature, signature_timestamp_now,
};
pub use writer::FrameWriter;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::x25::X25;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// v1 start-of-frame marker
pub const V1_MAGIC: u8 = 0xFE;
/// v2 start-of-frame marker
pub const V2_MAGIC: u8 = 0xFD;
/// v2 incompatibility flag: frame carries a signature trailer
pub const INCOMPAT_FLAG_SIGNED: u8 = 0x01;
/// Length of the v2 signature trailer
pub const SIGNATURE_LEN: usize = 13;

pub(crate) const V1_HEADER_LEN: usize = 6;
pub(crate) const V2_HEADER_LEN: usize = 10;

/// Protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// MAVLink 1.0
    V1,
    /// MAVLink 2.0
    #[default]
    V2,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::V1 => f.write_str("v1"),
            Version::V2 => f.write_str("v2"),
        }
    }
}

/// Message id plus undecoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRaw {
    /// Message id
    pub id: u32,
    /// Payload bytes as they appear on the wire
    pub payload: Vec<u8>,
}

/// Message carried by a frame
#[derive(Debug, Clone)]
pub enum FrameMessage {
    /// Not decoded (no dialect, or id unknown to the dialect)
    Raw(MessageRaw),
    /// Decoded through the dialect
    Typed(Arc<dyn Message>),
}

impl FrameMessage {
    /// Wrap a typed message
    pub fn typed<M: Message>(message: M) -> Self {
        FrameMessage::Typed(Arc::new(message))
    }

    /// Message id
    pub fn id(&self) -> u32 {
        match self {
            FrameMessage::Raw(raw) => raw.id,
            FrameMessage::Typed(m) => m.message_id(),
        }
    }

    /// Downcast a typed message
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        match self {
            FrameMessage::Typed(m) => m.downcast_ref::<T>(),
            FrameMessage::Raw(_) => None,
        }
    }

    /// Raw form, if undecoded
    pub fn as_raw(&self) -> Option<&MessageRaw> {
        match self {
            FrameMessage::Raw(raw) => Some(raw),
            FrameMessage::Typed(_) => None,
        }
    }

    /// Payload bytes for the given version
    ///
    /// Typed messages are encoded through the dialect.
    pub fn payload(&self, version: Version, dialect: Option<&Dialect>) -> Result<Cow<'_, [u8]>> {
        match self {
            FrameMessage::Raw(raw) => Ok(Cow::Borrowed(&raw.payload)),
            FrameMessage::Typed(m) => {
                let id = m.message_id();
                let codec = dialect
                    .and_then(|d| d.codec(id))
                    .ok_or(Error::UnknownMessageId(id))?;
                Ok(Cow::Owned(codec.encode(m.as_ref(), version == Version::V2)?))
            }
        }
    }
}

impl PartialEq for FrameMessage {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FrameMessage::Raw(a), FrameMessage::Raw(b)) => a == b,
            (FrameMessage::Typed(a), FrameMessage::Typed(b)) => **a == **b,
            _ => false,
        }
    }
}

impl From<MessageRaw> for FrameMessage {
    fn from(raw: MessageRaw) -> Self {
        FrameMessage::Raw(raw)
    }
}

impl From<Arc<dyn Message>> for FrameMessage {
    fn from(m: Arc<dyn Message>) -> Self {
        FrameMessage::Typed(m)
    }
}

/// MAVLink 1.0 frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameV1 {
    pub sequence_number: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message: FrameMessage,
    pub checksum: u16,
}

/// MAVLink 2.0 frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameV2 {
    pub incompatibility_flag: u8,
    pub compatibility_flag: u8,
    pub sequence_number: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message: FrameMessage,
    pub checksum: u16,
    /// Only meaningful when signed
    pub signature_link_id: u8,
    /// 10 µs ticks since 2015-01-01 UTC; only meaningful when signed
    pub signature_timestamp: u64,
    /// Only meaningful when signed
    pub signature: [u8; 6],
}

impl FrameV2 {
    /// Whether the signed flag is set
    pub fn is_signed(&self) -> bool {
        self.incompatibility_flag & INCOMPAT_FLAG_SIGNED != 0
    }
}

/// A MAVLink frame of either version
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    V1(FrameV1),
    V2(FrameV2),
}

/// Encoded frame plus the checksum that was written
pub(crate) struct Encoded {
    pub bytes: Vec<u8>,
    pub checksum: u16,
}

impl Frame {
    pub fn version(&self) -> Version {
        match self {
            Frame::V1(_) => Version::V1,
            Frame::V2(_) => Version::V2,
        }
    }

    pub fn sequence_number(&self) -> u8 {
        match self {
            Frame::V1(f) => f.sequence_number,
            Frame::V2(f) => f.sequence_number,
        }
    }

    pub fn system_id(&self) -> u8 {
        match self {
            Frame::V1(f) => f.system_id,
            Frame::V2(f) => f.system_id,
        }
    }

    pub fn component_id(&self) -> u8 {
        match self {
            Frame::V1(f) => f.component_id,
            Frame::V2(f) => f.component_id,
        }
    }

    pub fn message(&self) -> &FrameMessage {
        match self {
            Frame::V1(f) => &f.message,
            Frame::V2(f) => &f.message,
        }
    }

    pub fn message_id(&self) -> u32 {
        self.message().id()
    }

    pub fn checksum(&self) -> u16 {
        match self {
            Frame::V1(f) => f.checksum,
            Frame::V2(f) => f.checksum,
        }
    }

    /// Whether this is a signed v2 frame
    pub fn is_signed(&self) -> bool {
        matches!(self, Frame::V2(f) if f.is_signed())
    }

    /// Serialize to bytes
    ///
    /// Typed messages are encoded through `dialect`. The checksum is
    /// recomputed when the dialect knows the message id; otherwise the
    /// frame's stored checksum is written. A stored signature is written
    /// verbatim.
    pub fn encode(&self, dialect: Option<&Dialect>) -> Result<Vec<u8>> {
        Ok(self.encode_parts(dialect)?.bytes)
    }

    /// Recompute and store the checksum
    pub fn refresh_checksum(&mut self, dialect: Option<&Dialect>) -> Result<()> {
        let checksum = self.encode_parts(dialect)?.checksum;
        match self {
            Frame::V1(f) => f.checksum = checksum,
            Frame::V2(f) => f.checksum = checksum,
        }
        Ok(())
    }

    pub(crate) fn encode_parts(&self, dialect: Option<&Dialect>) -> Result<Encoded> {
        let version = self.version();
        let message = self.message();
        let id = message.id();
        let payload = message.payload(version, dialect)?;
        let crc_extra = dialect.and_then(|d| d.codec(id)).map(|c| c.crc_extra());

        let mut bytes = Vec::with_capacity(V2_HEADER_LEN + payload.len() + 2 + SIGNATURE_LEN);
        match self {
            Frame::V1(f) => {
                if id > u8::MAX as u32 {
                    return Err(Error::V1IdOverflow(id));
                }
                bytes.extend_from_slice(&[
                    V1_MAGIC,
                    payload.len() as u8,
                    f.sequence_number,
                    f.system_id,
                    f.component_id,
                    id as u8,
                ]);
            }
            Frame::V2(f) => {
                let id_le = id.to_le_bytes();
                bytes.extend_from_slice(&[
                    V2_MAGIC,
                    payload.len() as u8,
                    f.incompatibility_flag,
                    f.compatibility_flag,
                    f.sequence_number,
                    f.system_id,
                    f.component_id,
                    id_le[0],
                    id_le[1],
                    id_le[2],
                ]);
            }
        }
        bytes.extend_from_slice(&payload);

        let checksum = match crc_extra {
            Some(extra) => frame_checksum(&bytes[1..], extra),
            None => self.checksum(),
        };
        bytes.extend_from_slice(&checksum.to_le_bytes());

        if let Frame::V2(f) = self
            && f.is_signed()
        {
            bytes.push(f.signature_link_id);
            bytes.extend_from_slice(&f.signature_timestamp.to_le_bytes()[..6]);
            bytes.extend_from_slice(&f.signature);
        }

        Ok(Encoded { bytes, checksum })
    }
}

/// X.25 over header-after-magic plus payload, then the CRC-extra byte
pub(crate) fn frame_checksum(header_and_payload: &[u8], crc_extra: u8) -> u16 {
    let mut h = X25::new();
    h.update(header_and_payload);
    h.update_byte(crc_extra);
    h.finish()
}
