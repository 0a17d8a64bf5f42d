//! Telemetry log (`.tlog`) files
//!
//! Each entry is an 8-byte big-endian timestamp in microseconds since the
//! Unix epoch, followed by one encoded frame.

use crate::dialect::Dialect;
use crate::error::Result;
use crate::frame::{Frame, FrameReader};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One recorded frame
#[derive(Debug, Clone, PartialEq)]
pub struct TlogEntry {
    /// Microseconds since the Unix epoch
    pub timestamp_us: u64,
    pub frame: Frame,
}

/// Appends timestamped frames to a byte sink
pub struct TlogWriter<W: Write> {
    inner: W,
    dialect: Option<Arc<Dialect>>,
    entries: u64,
}

impl<W: Write> TlogWriter<W> {
    pub fn new(inner: W, dialect: Option<Arc<Dialect>>) -> Self {
        Self {
            inner,
            dialect,
            entries: 0,
        }
    }

    /// Record a frame with an explicit timestamp
    pub fn write_entry(&mut self, timestamp_us: u64, frame: &Frame) -> Result<()> {
        let bytes = frame.encode(self.dialect.as_deref())?;
        self.inner.write_all(&timestamp_us.to_be_bytes())?;
        self.inner.write_all(&bytes)?;
        self.entries += 1;
        Ok(())
    }

    /// Record a frame stamped with the current time
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        self.write_entry(now, frame)
    }

    /// Entries written so far
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads timestamped frames back
pub struct TlogReader<R: Read> {
    reader: FrameReader<R>,
}

impl<R: Read> TlogReader<R> {
    pub fn new(inner: R, dialect: Option<Arc<Dialect>>) -> Self {
        Self {
            reader: FrameReader::new(inner, dialect),
        }
    }

    /// Next entry, or `None` at a clean end of file
    pub fn next_entry(&mut self) -> Result<Option<TlogEntry>> {
        if self.reader.at_eof()? {
            return Ok(None);
        }
        let mut ts = [0u8; 8];
        self.reader.read_exact(&mut ts)?;
        let frame = self.reader.read()?;
        Ok(Some(TlogEntry {
            timestamp_us: u64::from_be_bytes(ts),
            frame,
        }))
    }
}

impl<R: Read> Iterator for TlogReader<R> {
    type Item = Result<TlogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::common::{self, MessageHeartbeat};
    use crate::frame::{FrameMessage, FrameV2};
    use std::fs::File;
    use std::io::{BufWriter, Cursor};

    fn heartbeat_frame(seq: u8) -> Frame {
        Frame::V2(FrameV2 {
            incompatibility_flag: 0,
            compatibility_flag: 0,
            sequence_number: seq,
            system_id: 1,
            component_id: 1,
            message: FrameMessage::typed(MessageHeartbeat {
                custom_mode: seq as u32,
                ..Default::default()
            }),
            checksum: 0,
            signature_link_id: 0,
            signature_timestamp: 0,
            signature: [0; 6],
        })
    }

    #[test]
    fn test_entry_layout() {
        let dialect = Arc::new(common::dialect());
        let mut w = TlogWriter::new(Vec::new(), Some(dialect));
        w.write_entry(0x0102030405060708, &heartbeat_frame(0)).unwrap();
        let bytes = w.into_inner();
        assert_eq!(&bytes[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bytes[8], 0xFD);
    }

    #[test]
    fn test_file_roundtrip() {
        let dialect = Arc::new(common::dialect());
        let tmp = tempfile::NamedTempFile::new().unwrap();

        {
            let file = File::create(tmp.path()).unwrap();
            let mut w = TlogWriter::new(BufWriter::new(file), Some(dialect.clone()));
            for seq in 0..3 {
                w.write_entry(1_000 + seq as u64, &heartbeat_frame(seq)).unwrap();
            }
            assert_eq!(w.entries(), 3);
            w.flush().unwrap();
        }

        let file = File::open(tmp.path()).unwrap();
        let entries: Vec<TlogEntry> = TlogReader::new(file, Some(dialect))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].timestamp_us, 1_002);
        let hb = entries[2]
            .frame
            .message()
            .downcast_ref::<MessageHeartbeat>()
            .unwrap();
        assert_eq!(hb.custom_mode, 2);
    }

    #[test]
    fn test_truncated_entry_is_error() {
        let mut r = TlogReader::new(Cursor::new(vec![0u8; 5]), None);
        assert!(r.next_entry().is_err());
    }

    #[test]
    fn test_empty_log() {
        let mut r = TlogReader::new(Cursor::new(Vec::new()), None);
        assert!(r.next_entry().unwrap().is_none());
    }
}
