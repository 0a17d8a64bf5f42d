//! X.25 CRC-16 (CRC-16/MCRF4XX) used for frame checksums and CRC-extra

/// Initial accumulator value
const X25_INIT: u16 = 0xFFFF;

/// Incremental X.25 hasher
#[derive(Debug, Clone, Copy)]
pub struct X25 {
    crc: u16,
}

impl X25 {
    /// Create a hasher in its initial state
    pub const fn new() -> Self {
        Self { crc: X25_INIT }
    }

    /// Feed a single byte
    #[inline]
    pub fn update_byte(&mut self, b: u8) {
        let mut t = b ^ (self.crc & 0xFF) as u8;
        t ^= t << 4;
        let t = t as u16;
        self.crc = (self.crc >> 8) ^ (t << 8) ^ (t << 3) ^ (t >> 4);
    }

    /// Feed a byte slice
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.update_byte(b);
        }
    }

    /// Current checksum value
    #[inline]
    pub fn finish(&self) -> u16 {
        self.crc
    }

    /// Reset to the initial state
    pub fn reset(&mut self) {
        self.crc = X25_INIT;
    }
}

impl Default for X25 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot checksum over a byte slice
pub fn checksum(data: &[u8]) -> u16 {
    let mut h = X25::new();
    h.update(data);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_initial_state() {
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_check_value() {
        // CRC-16/MCRF4XX check value
        assert_eq!(checksum(b"123456789"), 0x6F91);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"HEARTBEAT uint32_t custom_mode ";
        let mut h = X25::new();
        h.update(&data[..7]);
        h.update(&data[7..]);
        assert_eq!(h.finish(), checksum(data));

        h.reset();
        assert_eq!(h.finish(), 0xFFFF);
    }

    #[test]
    fn test_v1_frame_checksum() {
        // len, seq, sys, comp, id, payload, crc-extra
        let bytes = [0x05, 0x27, 0x01, 0x02, 0x05, 0x10, 0x10, 0x10, 0x10, 0x10, 53];
        assert_eq!(checksum(&bytes), 0x66E5);
    }
}
