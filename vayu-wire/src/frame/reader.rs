//! Frame reader over any byte stream

use super::signing::SignatureValidator;
use super::{
    Frame, FrameMessage, FrameV1, FrameV2, INCOMPAT_FLAG_SIGNED, MessageRaw, SIGNATURE_LEN,
    SigningKey, V1_HEADER_LEN, V1_MAGIC, V2_HEADER_LEN, V2_MAGIC, Version, frame_checksum,
};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

/// Reads frames one at a time from a buffered byte stream
///
/// Errors other than [`Error::Io`] concern a single frame; the reader has
/// already consumed the offending bytes and the next call continues with
/// the following ones.
pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
    dialect: Option<Arc<Dialect>>,
    validator: Option<SignatureValidator>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, dialect: Option<Arc<Dialect>>) -> Self {
        Self {
            inner: BufReader::new(inner),
            dialect,
            validator: None,
        }
    }

    /// Require every frame to be signed with `key`
    pub fn with_inbound_key(mut self, key: SigningKey) -> Self {
        self.validator = Some(SignatureValidator::new(key));
        self
    }

    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    /// Whether the stream has no more bytes
    pub fn at_eof(&mut self) -> Result<bool> {
        Ok(self.inner.fill_buf()?.is_empty())
    }

    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        Ok(())
    }

    /// Read the next frame
    pub fn read(&mut self) -> Result<Frame> {
        let mut magic = [0u8; 1];
        self.inner.read_exact(&mut magic)?;

        let (frame, raw) = match magic[0] {
            V1_MAGIC => self.read_v1()?,
            V2_MAGIC => self.read_v2()?,
            other => return Err(Error::InvalidMagic(other)),
        };

        if let Some(validator) = self.validator.as_mut() {
            validator.check(&frame, &raw)?;
        }

        self.decode(frame, &raw)
    }

    fn read_v1(&mut self) -> Result<(Frame, Vec<u8>)> {
        let mut raw = vec![0u8; V1_HEADER_LEN];
        raw[0] = V1_MAGIC;
        self.inner.read_exact(&mut raw[1..])?;
        let len = raw[1] as usize;
        let body_start = raw.len();
        raw.resize(body_start + len + 2, 0);
        self.inner.read_exact(&mut raw[body_start..])?;

        let payload = raw[V1_HEADER_LEN..V1_HEADER_LEN + len].to_vec();
        let checksum = u16::from_le_bytes([raw[V1_HEADER_LEN + len], raw[V1_HEADER_LEN + len + 1]]);
        let frame = Frame::V1(FrameV1 {
            sequence_number: raw[2],
            system_id: raw[3],
            component_id: raw[4],
            message: MessageRaw {
                id: raw[5] as u32,
                payload,
            }
            .into(),
            checksum,
        });
        Ok((frame, raw))
    }

    fn read_v2(&mut self) -> Result<(Frame, Vec<u8>)> {
        let mut raw = vec![0u8; V2_HEADER_LEN];
        raw[0] = V2_MAGIC;
        self.inner.read_exact(&mut raw[1..])?;
        let len = raw[1] as usize;
        let incompat = raw[2];
        if incompat & !INCOMPAT_FLAG_SIGNED != 0 {
            return Err(Error::UnknownIncompatibilityFlag(incompat));
        }
        let signed = incompat & INCOMPAT_FLAG_SIGNED != 0;

        let body_start = raw.len();
        let trailer = if signed { SIGNATURE_LEN } else { 0 };
        raw.resize(body_start + len + 2 + trailer, 0);
        self.inner.read_exact(&mut raw[body_start..])?;

        let end = V2_HEADER_LEN + len;
        let checksum = u16::from_le_bytes([raw[end], raw[end + 1]]);
        let (mut link_id, mut timestamp, mut signature) = (0u8, 0u64, [0u8; 6]);
        if signed {
            let t = end + 2;
            link_id = raw[t];
            let mut ts = [0u8; 8];
            ts[..6].copy_from_slice(&raw[t + 1..t + 7]);
            timestamp = u64::from_le_bytes(ts);
            signature.copy_from_slice(&raw[t + 7..t + 13]);
        }

        let frame = Frame::V2(FrameV2 {
            incompatibility_flag: incompat,
            compatibility_flag: raw[3],
            sequence_number: raw[4],
            system_id: raw[5],
            component_id: raw[6],
            message: MessageRaw {
                id: u32::from_le_bytes([raw[7], raw[8], raw[9], 0]),
                payload: raw[V2_HEADER_LEN..end].to_vec(),
            }
            .into(),
            checksum,
            signature_link_id: link_id,
            signature_timestamp: timestamp,
            signature,
        });
        Ok((frame, raw))
    }

    /// Verify the checksum and decode the payload when the dialect knows the id
    fn decode(&self, mut frame: Frame, raw: &[u8]) -> Result<Frame> {
        let Some(dialect) = self.dialect.as_deref() else {
            return Ok(frame);
        };
        let id = frame.message_id();
        let Some(codec) = dialect.codec(id) else {
            return Ok(frame);
        };

        let header_len = match frame.version() {
            Version::V1 => V1_HEADER_LEN,
            Version::V2 => V2_HEADER_LEN,
        };
        let payload_len = raw[1] as usize;
        let expected = frame_checksum(&raw[1..header_len + payload_len], codec.crc_extra());
        if expected != frame.checksum() {
            return Err(Error::ChecksumMismatch {
                expected,
                actual: frame.checksum(),
            });
        }

        let v2 = frame.version() == Version::V2;
        let payload = &raw[header_len..header_len + payload_len];
        let message = codec.decode(payload, v2)?;

        match &mut frame {
            Frame::V1(f) => f.message = FrameMessage::Typed(message),
            Frame::V2(f) => f.message = FrameMessage::Typed(message),
        }

        // Re-encoding drops trailing zeros, so the checksum a writer would
        // produce differs from the one received.
        let untruncated = payload.len() > codec.size_extended()
            || (payload.len() > 1 && payload.last() == Some(&0));
        if v2 && untruncated {
            frame.refresh_checksum(Some(dialect))?;
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameWriter;
    use crate::mavlink_message;
    use crate::message::MessageDef;
    use std::io::Cursor;

    mavlink_message! {
        pub struct MessageTest5(5) {
            test_byte: u8,
            test_uint: u32,
        }
    }

    fn dialect() -> Arc<Dialect> {
        Arc::new(Dialect::new(3, [MessageDef::of::<MessageTest5>()]).unwrap())
    }

    const S1_BYTES: [u8; 13] = [
        0xFE, 0x05, 0x27, 0x01, 0x02, 0x05, 0x10, 0x10, 0x10, 0x10, 0x10, 0xE5, 0x66,
    ];

    #[test]
    fn test_read_v1_typed() {
        let mut r = FrameReader::new(Cursor::new(S1_BYTES.to_vec()), Some(dialect()));
        let frame = r.read().unwrap();
        assert_eq!(frame.version(), Version::V1);
        assert_eq!(frame.sequence_number(), 0x27);
        assert_eq!(frame.checksum(), 0x66E5);
        let msg = frame.message().downcast_ref::<MessageTest5>().unwrap();
        assert_eq!(msg.test_byte, 0x10);
        assert_eq!(msg.test_uint, 0x10101010);
        assert!(r.at_eof().unwrap());
    }

    #[test]
    fn test_read_without_dialect_stays_raw() {
        let mut r = FrameReader::new(Cursor::new(S1_BYTES.to_vec()), None);
        let frame = r.read().unwrap();
        assert_eq!(
            frame.message().as_raw(),
            Some(&MessageRaw {
                id: 5,
                payload: vec![0x10; 5]
            })
        );
    }

    #[test]
    fn test_bad_checksum_then_recovery() {
        let mut bytes = S1_BYTES.to_vec();
        bytes[11] ^= 0x01;
        bytes.extend_from_slice(&S1_BYTES);
        let mut r = FrameReader::new(Cursor::new(bytes), Some(dialect()));
        assert!(matches!(r.read(), Err(Error::ChecksumMismatch { .. })));
        assert!(r.read().is_ok());
    }

    #[test]
    fn test_invalid_magic_is_not_fatal() {
        let mut bytes = vec![0x00];
        bytes.extend_from_slice(&S1_BYTES);
        let mut r = FrameReader::new(Cursor::new(bytes), Some(dialect()));
        let err = r.read().unwrap_err();
        assert!(matches!(err, Error::InvalidMagic(0)));
        assert!(!err.is_fatal());
        assert!(r.read().is_ok());
    }

    #[test]
    fn test_truncated_frame_is_fatal() {
        let mut r = FrameReader::new(Cursor::new(S1_BYTES[..8].to_vec()), Some(dialect()));
        let err = r.read().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_incompat_flag() {
        let bytes = vec![0xFD, 0x01, 0x02, 0x00, 0, 1, 1, 0, 0, 0, 0, 0, 0];
        let mut r = FrameReader::new(Cursor::new(bytes), None);
        assert!(matches!(
            r.read(),
            Err(Error::UnknownIncompatibilityFlag(0x02))
        ));
    }

    #[test]
    fn test_untruncated_v2_checksum_is_normalized() {
        let d = dialect();
        // test_uint = 1, test_byte = 0: a compliant writer sends 1 byte
        let mut w = FrameWriter::new(Vec::new(), Version::V2, 1, 1).with_dialect(d.clone());
        w.write_message(&FrameMessage::typed(MessageTest5 {
            test_byte: 0,
            test_uint: 1,
        }))
        .unwrap();
        let compliant = w.into_inner();

        // same message sent untruncated by a sloppy peer
        let mut sloppy = vec![0xFD, 5, 0, 0, 0, 1, 1, 5, 0, 0, 1, 0, 0, 0, 0];
        let crc = frame_checksum(&sloppy[1..], 53);
        sloppy.extend_from_slice(&crc.to_le_bytes());

        let mut r = FrameReader::new(Cursor::new(sloppy), Some(d.clone()));
        let frame = r.read().unwrap();
        let mut r2 = FrameReader::new(Cursor::new(compliant), Some(d));
        let expected = r2.read().unwrap();
        assert_eq!(frame.checksum(), expected.checksum());
    }

    #[test]
    fn test_inbound_key_requires_signature() {
        let key = SigningKey::new([1; 32]);
        let mut r = FrameReader::new(Cursor::new(S1_BYTES.to_vec()), Some(dialect()))
            .with_inbound_key(key);
        assert!(matches!(r.read(), Err(Error::SignatureRequired)));
    }
}
