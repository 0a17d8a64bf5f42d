//! Frame writer: authors outgoing frames and serializes them

use super::{Frame, FrameMessage, FrameSigner, FrameV1, FrameV2, SigningKey, Version};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use std::io::Write;
use std::sync::Arc;

/// Writes frames to a byte stream
///
/// Messages written through [`FrameWriter::write_message`] are wrapped in a
/// frame carrying this writer's system/component ids and its own sequence
/// counter, which wraps at 256.
pub struct FrameWriter<W: Write> {
    inner: W,
    dialect: Option<Arc<Dialect>>,
    version: Version,
    system_id: u8,
    component_id: u8,
    sequence_number: u8,
    signer: Option<FrameSigner>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W, version: Version, system_id: u8, component_id: u8) -> Self {
        Self {
            inner,
            dialect: None,
            version,
            system_id,
            component_id,
            sequence_number: 0,
            signer: None,
        }
    }

    /// Encode typed messages and compute checksums through `dialect`
    pub fn with_dialect(mut self, dialect: Arc<Dialect>) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Sign authored v2 frames
    pub fn with_signing(mut self, key: SigningKey, link_id: u8) -> Result<Self> {
        if self.version == Version::V1 {
            return Err(Error::MessageEncode(
                "signing requires MAVLink v2".to_string(),
            ));
        }
        self.signer = Some(FrameSigner::new(key, link_id));
        Ok(self)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Wrap a message in a new frame and write it
    ///
    /// The message id must be known to the writer's dialect. The sequence
    /// counter only advances once the frame has been encoded.
    pub fn write_message(&mut self, message: &FrameMessage) -> Result<()> {
        let id = message.id();
        if self.version == Version::V1 && id > u8::MAX as u32 {
            return Err(Error::V1IdOverflow(id));
        }
        let dialect = self.dialect.as_deref().ok_or(Error::DialectMissing(id))?;
        if !dialect.contains(id) {
            return Err(Error::UnknownMessageId(id));
        }

        let sequence_number = self.sequence_number;
        let bytes = match self.version {
            Version::V1 => Frame::V1(FrameV1 {
                sequence_number,
                system_id: self.system_id,
                component_id: self.component_id,
                message: message.clone(),
                checksum: 0,
            })
            .encode(Some(dialect))?,
            Version::V2 => {
                let mut frame = FrameV2 {
                    incompatibility_flag: 0,
                    compatibility_flag: 0,
                    sequence_number,
                    system_id: self.system_id,
                    component_id: self.component_id,
                    message: message.clone(),
                    checksum: 0,
                    signature_link_id: 0,
                    signature_timestamp: 0,
                    signature: [0; 6],
                };
                match self.signer.as_mut() {
                    Some(signer) => signer.sign(&mut frame, Some(dialect))?,
                    None => Frame::V2(frame).encode(Some(dialect))?,
                }
            }
        };
        self.sequence_number = sequence_number.wrapping_add(1);

        self.inner.write_all(&bytes)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Write an existing frame verbatim
    ///
    /// The checksum is recomputed when the dialect knows the message id.
    /// The signature trailer is written as stored.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode(self.dialect.as_deref())?;
        self.inner.write_all(&bytes)?;
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::common::{self, MessageHeartbeat};
    use crate::frame::{FrameReader, MessageRaw};
    use crate::mavlink_message;
    use crate::message::MessageDef;
    use std::io::Cursor;

    mavlink_message! {
        pub struct MessageTest5(5) {
            test_byte: u8,
            test_uint: u32,
        }
    }

    // Same id as MessageTest5 but a different layout
    mavlink_message! {
        pub struct MessageImpostor5(5) {
            value: u16,
        }
    }

    fn common_dialect() -> Arc<Dialect> {
        Arc::new(common::dialect())
    }

    fn raw(id: u32) -> FrameMessage {
        MessageRaw {
            id,
            payload: vec![1, 2],
        }
        .into()
    }

    fn heartbeat() -> FrameMessage {
        FrameMessage::typed(MessageHeartbeat {
            mavtype: 2,
            autopilot: 3,
            mavlink_version: 3,
            ..Default::default()
        })
    }

    fn writer(version: Version) -> FrameWriter<Vec<u8>> {
        FrameWriter::new(Vec::new(), version, 1, 1).with_dialect(common_dialect())
    }

    fn sequence_numbers(bytes: Vec<u8>, count: usize) -> Vec<u8> {
        let mut r = FrameReader::new(Cursor::new(bytes), Some(common_dialect()));
        (0..count).map(|_| r.read().unwrap().sequence_number()).collect()
    }

    #[test]
    fn test_sequence_wraps() {
        let mut w = writer(Version::V2);
        for _ in 0..257 {
            w.write_message(&heartbeat()).unwrap();
        }
        let seqs = sequence_numbers(w.into_inner(), 257);
        assert_eq!(seqs[0], 0);
        assert_eq!(seqs[255], 255);
        assert_eq!(seqs[256], 0);
    }

    #[test]
    fn test_v1_rejects_wide_id_without_consuming_sequence() {
        let mut w = writer(Version::V1);
        assert!(matches!(
            w.write_message(&raw(256)),
            Err(Error::V1IdOverflow(256))
        ));
        w.write_message(&heartbeat()).unwrap();
        assert_eq!(sequence_numbers(w.into_inner(), 1), [0]);
    }

    #[test]
    fn test_write_without_dialect_fails() {
        let mut w = FrameWriter::new(Vec::new(), Version::V2, 1, 1);
        assert!(matches!(
            w.write_message(&raw(0)),
            Err(Error::DialectMissing(0))
        ));
        assert!(matches!(
            w.write_message(&heartbeat()),
            Err(Error::DialectMissing(0))
        ));
        assert!(w.get_ref().is_empty());
    }

    #[test]
    fn test_unknown_id_is_rejected() {
        let mut w = writer(Version::V2);
        assert!(matches!(
            w.write_message(&raw(9999)),
            Err(Error::UnknownMessageId(9999))
        ));
        assert!(w.get_ref().is_empty());
    }

    #[test]
    fn test_failed_writes_leave_no_sequence_gap() {
        let dialect = Arc::new(Dialect::new(3, [MessageDef::of::<MessageTest5>()]).unwrap());
        let mut w = FrameWriter::new(Vec::new(), Version::V2, 1, 1).with_dialect(dialect.clone());

        assert!(matches!(
            w.write_message(&raw(9999)),
            Err(Error::UnknownMessageId(9999))
        ));
        // id is known, but the typed value does not match its codec
        assert!(matches!(
            w.write_message(&FrameMessage::typed(MessageImpostor5 { value: 7 })),
            Err(Error::MessageEncode(_))
        ));
        assert!(w.get_ref().is_empty());

        let test5 = FrameMessage::typed(MessageTest5 {
            test_byte: 1,
            test_uint: 2,
        });
        w.write_message(&test5).unwrap();
        w.write_message(&test5).unwrap();

        let mut r = FrameReader::new(Cursor::new(w.into_inner()), Some(dialect));
        assert_eq!(r.read().unwrap().sequence_number(), 0);
        assert_eq!(r.read().unwrap().sequence_number(), 1);
    }

    #[test]
    fn test_signing_requires_v2() {
        let w = FrameWriter::new(Vec::new(), Version::V1, 1, 1);
        assert!(w.with_signing(SigningKey::new([0; 32]), 0).is_err());
    }

    #[test]
    fn test_signed_roundtrip() {
        let key = SigningKey::new([3; 32]);
        let mut w = writer(Version::V2).with_signing(key.clone(), 2).unwrap();
        w.write_message(&heartbeat()).unwrap();
        w.write_message(&heartbeat()).unwrap();

        let mut r = FrameReader::new(Cursor::new(w.into_inner()), Some(common_dialect()))
            .with_inbound_key(key);
        let a = r.read().unwrap();
        let b = r.read().unwrap();
        assert!(a.is_signed() && b.is_signed());
        assert_eq!(a.message(), &heartbeat());
        let (Frame::V2(a), Frame::V2(b)) = (a, b) else {
            panic!("expected v2 frames");
        };
        assert_eq!(a.signature_link_id, 2);
        assert!(b.signature_timestamp > a.signature_timestamp);
    }

    #[test]
    fn test_write_frame_is_verbatim() {
        let frame = Frame::V1(FrameV1 {
            sequence_number: 99,
            system_id: 7,
            component_id: 8,
            message: raw(4),
            checksum: 0xABCD,
        });
        let mut w = FrameWriter::new(Vec::new(), Version::V2, 1, 1);
        w.write_frame(&frame).unwrap();
        let mut r = FrameReader::new(Cursor::new(w.into_inner()), None);
        assert_eq!(r.read().unwrap(), frame);
    }
}
