//! v2 frame signing
//!
//! signature = SHA-256(key ‖ frame bytes from magic through timestamp)[..6]

use super::{Frame, FrameV2, INCOMPAT_FLAG_SIGNED};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// 2015-01-01 00:00:00 UTC as Unix seconds
pub const SIGNATURE_EPOCH_UNIX_SECS: u64 = 1_420_070_400;

/// Replay window in 10 µs ticks (10 s)
pub const SIGNATURE_REPLAY_WINDOW: u64 = 1_000_000;

/// 32-byte shared signing secret
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for SigningKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

// Keys never show up in logs
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Current time in signature ticks (10 µs since 2015-01-01 UTC)
pub fn signature_timestamp_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ticks = since_unix.as_micros() as u64 / 10;
    ticks.saturating_sub(SIGNATURE_EPOCH_UNIX_SECS * 100_000)
}

/// First six bytes of SHA-256 over the key and the signed frame bytes
pub fn compute_signature(key: &SigningKey, signed_bytes: &[u8]) -> [u8; 6] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(signed_bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 6];
    out.copy_from_slice(&digest[..6]);
    out
}

/// Signs outgoing v2 frames with a monotonically increasing timestamp
#[derive(Debug, Clone)]
pub struct FrameSigner {
    key: SigningKey,
    link_id: u8,
    last_timestamp: u64,
}

impl FrameSigner {
    pub fn new(key: SigningKey, link_id: u8) -> Self {
        Self {
            key,
            link_id,
            last_timestamp: 0,
        }
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    pub fn link_id(&self) -> u8 {
        self.link_id
    }

    /// Next timestamp: wall clock, but never equal to or below the previous one
    pub fn next_timestamp(&mut self) -> u64 {
        let ts = signature_timestamp_now().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    /// Sign a v2 frame in place and return its encoded bytes
    pub fn sign(&mut self, frame: &mut FrameV2, dialect: Option<&Dialect>) -> Result<Vec<u8>> {
        frame.incompatibility_flag |= INCOMPAT_FLAG_SIGNED;
        frame.signature_link_id = self.link_id;
        frame.signature_timestamp = self.next_timestamp();

        let mut wrapped = Frame::V2(frame.clone());
        let encoded = wrapped.encode_parts(dialect)?;
        let mut bytes = encoded.bytes;
        let sig_start = bytes.len() - 6;
        let signature = compute_signature(&self.key, &bytes[..sig_start]);
        bytes[sig_start..].copy_from_slice(&signature);

        if let Frame::V2(f) = &mut wrapped {
            f.checksum = encoded.checksum;
            f.signature = signature;
            *frame = f.clone();
        }
        Ok(bytes)
    }

    /// Re-checksum a frame and, for v2, re-sign it
    ///
    /// Used before forwarding a received frame under this signer's key.
    pub fn fix(&mut self, frame: &mut Frame, dialect: Option<&Dialect>) -> Result<()> {
        match frame {
            Frame::V1(_) => frame.refresh_checksum(dialect),
            Frame::V2(f) => self.sign(f, dialect).map(|_| ()),
        }
    }
}

/// Inbound signature check with replay protection
#[derive(Debug, Clone)]
pub(crate) struct SignatureValidator {
    key: SigningKey,
    highest_timestamp: u64,
}

impl SignatureValidator {
    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            highest_timestamp: 0,
        }
    }

    /// Check a frame against its raw bytes (including the trailer)
    pub fn check(&mut self, frame: &Frame, raw: &[u8]) -> Result<()> {
        let f = match frame {
            Frame::V2(f) if f.is_signed() => f,
            _ => return Err(Error::SignatureRequired),
        };

        let sig_start = raw.len() - 6;
        if compute_signature(&self.key, &raw[..sig_start]) != f.signature {
            return Err(Error::SignatureMismatch);
        }

        let minimum = self
            .highest_timestamp
            .saturating_sub(SIGNATURE_REPLAY_WINDOW);
        if f.signature_timestamp < minimum {
            return Err(Error::SignatureTimestampTooOld {
                timestamp: f.signature_timestamp,
                minimum,
            });
        }
        self.highest_timestamp = self.highest_timestamp.max(f.signature_timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MessageRaw;

    fn unsigned_v2() -> FrameV2 {
        FrameV2 {
            incompatibility_flag: 0,
            compatibility_flag: 0,
            sequence_number: 1,
            system_id: 2,
            component_id: 3,
            message: MessageRaw {
                id: 77,
                payload: vec![1, 2, 3],
            }
            .into(),
            checksum: 0xBEEF,
            signature_link_id: 0,
            signature_timestamp: 0,
            signature: [0; 6],
        }
    }

    #[test]
    fn test_timestamp_now_is_after_epoch() {
        // 2020-01-01 is ~5 years of ticks after 2015-01-01
        assert!(signature_timestamp_now() > 5 * 365 * 86_400 * 100_000);
    }

    #[test]
    fn test_signer_timestamps_strictly_increase() {
        let mut s = FrameSigner::new(SigningKey::new([1; 32]), 0);
        let a = s.next_timestamp();
        let b = s.next_timestamp();
        let c = s.next_timestamp();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_sign_sets_trailer() {
        let mut s = FrameSigner::new(SigningKey::new([7; 32]), 4);
        let mut f = unsigned_v2();
        let bytes = s.sign(&mut f, None).unwrap();
        assert!(f.is_signed());
        assert_eq!(f.signature_link_id, 4);
        assert_eq!(bytes.len(), 10 + 3 + 2 + 13);
        assert_eq!(&bytes[bytes.len() - 6..], &f.signature);
        assert_eq!(
            compute_signature(s.key(), &bytes[..bytes.len() - 6]),
            f.signature
        );
    }

    #[test]
    fn test_validator_accepts_and_rejects() {
        let key = SigningKey::new([7; 32]);
        let mut signer = FrameSigner::new(key.clone(), 0);
        let mut validator = SignatureValidator::new(key);

        let mut f = unsigned_v2();
        let bytes = signer.sign(&mut f, None).unwrap();
        validator.check(&Frame::V2(f.clone()), &bytes).unwrap();

        let mut tampered = bytes.clone();
        tampered[10] ^= 0xFF;
        assert!(matches!(
            validator.check(&Frame::V2(f.clone()), &tampered),
            Err(Error::SignatureMismatch)
        ));

        assert!(matches!(
            validator.check(&Frame::V2(unsigned_v2()), &bytes),
            Err(Error::SignatureRequired)
        ));
    }

    #[test]
    fn test_validator_replay_window() {
        let key = SigningKey::new([9; 32]);
        let mut validator = SignatureValidator::new(key.clone());

        let signed_at = |ts: u64| {
            let mut f = unsigned_v2();
            f.incompatibility_flag = INCOMPAT_FLAG_SIGNED;
            f.signature_timestamp = ts;
            let frame = Frame::V2(f);
            let mut bytes = frame.encode(None).unwrap();
            let start = bytes.len() - 6;
            let sig = compute_signature(&key, &bytes[..start]);
            bytes[start..].copy_from_slice(&sig);
            let Frame::V2(mut f) = frame else {
                unreachable!()
            };
            f.signature = sig;
            (Frame::V2(f), bytes)
        };

        let (f, b) = signed_at(5_000_000);
        validator.check(&f, &b).unwrap();

        // inside the window, older than the highest
        let (f, b) = signed_at(4_500_000);
        validator.check(&f, &b).unwrap();

        let (f, b) = signed_at(3_999_999);
        assert!(matches!(
            validator.check(&f, &b),
            Err(Error::SignatureTimestampTooOld {
                timestamp: 3_999_999,
                minimum: 4_000_000
            })
        ));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", SigningKey::new([1; 32])), "SigningKey(..)");
    }
}
