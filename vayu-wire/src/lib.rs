//! Vayu wire - MAVLink 1.0/2.0 codec
//!
//! This library turns byte streams into MAVLink frames and back:
//!
//! - [`message`]: typed message definitions, field layout, CRC-extra
//! - [`dialect`]: versioned message sets
//! - [`frame`]: v1/v2 frames, checksums, v2 signing
//! - [`tlog`]: timestamped frame logs
//! - [`dialects`]: built-in definitions (`common` subset)

pub mod dialect;
pub mod dialects;
pub mod error;
pub mod frame;
pub mod message;
pub mod tlog;
pub mod x25;

// Re-export commonly used types
pub use dialect::Dialect;
pub use error::{Error, Result};
pub use frame::{
    Frame, FrameMessage, FrameReader, FrameSigner, FrameV1, FrameV2, FrameWriter, MessageRaw,
    SigningKey, Version,
};
pub use message::{Message, MessageCodec, MessageDef, MessageType, Value};
