//! Dialects: versioned sets of message definitions

use crate::error::{Error, Result};
use crate::frame::{MessageRaw, Version};
use crate::message::{Message, MessageCodec, MessageDef, MessageType};
use std::collections::HashMap;
use std::sync::Arc;

/// A versioned set of message codecs keyed by id
#[derive(Debug, Clone)]
pub struct Dialect {
    version: u32,
    codecs: HashMap<u32, MessageCodec>,
}

impl Dialect {
    /// Build a dialect, validating every definition
    ///
    /// Fails on the first invalid definition or on a duplicate id.
    pub fn new(version: u32, messages: impl IntoIterator<Item = MessageDef>) -> Result<Self> {
        let mut codecs = HashMap::new();
        for def in messages {
            let codec = MessageCodec::new(def)?;
            let id = codec.id();
            if codecs.insert(id, codec).is_some() {
                return Err(Error::DuplicateMessageId(id));
            }
        }
        log::debug!(
            "Dialect v{} built with {} message(s)",
            version,
            codecs.len()
        );
        Ok(Self { version, codecs })
    }

    /// Dialect version
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Whether the dialect has no messages
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Whether a message id is known
    pub fn contains(&self, id: u32) -> bool {
        self.codecs.contains_key(&id)
    }

    /// Codec for a message id
    pub fn codec(&self, id: u32) -> Option<&MessageCodec> {
        self.codecs.get(&id)
    }

    /// Codec for a message type
    pub fn codec_for<M: MessageType>(&self) -> Option<&MessageCodec> {
        let d = M::describe();
        self.codecs.get(&d.id).filter(|c| c.descriptor().name == d.name)
    }

    /// Codec for an id whose CRC-extra also matches
    ///
    /// Used to check that a dialect carries the standard definition of a
    /// message rather than a different one under the same id.
    pub fn codec_matching(&self, id: u32, crc_extra: u8) -> Option<&MessageCodec> {
        self.codec(id).filter(|c| c.crc_extra() == crc_extra)
    }

    /// Message ids in ascending order
    pub fn message_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.codecs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Decode a raw message
    pub fn decode(&self, raw: &MessageRaw, version: Version) -> Result<Arc<dyn Message>> {
        let codec = self
            .codec(raw.id)
            .ok_or(Error::UnknownMessageId(raw.id))?;
        codec.decode(&raw.payload, version == Version::V2)
    }

    /// Encode a message into its raw form
    pub fn encode(&self, message: &dyn Message, version: Version) -> Result<MessageRaw> {
        let id = message.message_id();
        let codec = self.codec(id).ok_or(Error::UnknownMessageId(id))?;
        Ok(MessageRaw {
            id,
            payload: codec.encode(message, version == Version::V2)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink_message;

    mavlink_message! {
        pub struct MessageAlpha(1) {
            a: u8,
        }
    }

    mavlink_message! {
        pub struct MessageBeta(1) {
            b: u16,
        }
    }

    mavlink_message! {
        pub struct MessageGamma(300) {
            g: u32,
        }
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = Dialect::new(1, [MessageDef::of::<MessageAlpha>(), MessageDef::of::<MessageBeta>()])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateMessageId(1)));
    }

    #[test]
    fn test_lookup() {
        let d = Dialect::new(3, [MessageDef::of::<MessageAlpha>(), MessageDef::of::<MessageGamma>()])
            .unwrap();
        assert_eq!(d.version(), 3);
        assert_eq!(d.len(), 2);
        assert_eq!(d.message_ids(), vec![1, 300]);
        assert!(d.contains(300));
        assert!(d.codec_for::<MessageGamma>().is_some());
        assert!(d.codec_for::<MessageBeta>().is_none());

        let crc = d.codec(1).unwrap().crc_extra();
        assert!(d.codec_matching(1, crc).is_some());
        assert!(d.codec_matching(1, crc.wrapping_add(1)).is_none());
    }

    #[test]
    fn test_encode_decode_via_dialect() {
        let d = Dialect::new(3, [MessageDef::of::<MessageGamma>()]).unwrap();
        let raw = d.encode(&MessageGamma { g: 7 }, Version::V2).unwrap();
        assert_eq!(raw.id, 300);
        assert_eq!(raw.payload, [7]);

        let msg = d.decode(&raw, Version::V2).unwrap();
        assert_eq!(msg.downcast_ref::<MessageGamma>(), Some(&MessageGamma { g: 7 }));

        let unknown = MessageRaw {
            id: 99,
            payload: vec![0],
        };
        assert!(matches!(
            d.decode(&unknown, Version::V2),
            Err(Error::UnknownMessageId(99))
        ));
    }
}
