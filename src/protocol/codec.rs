//! XOR byte codec
//!
//! Producers store `byte ^ key` in the ring; consumers undo it before the
//! byte reaches the output. Symmetric, stateless, zero-allocation.

/// Single-byte XOR key shared by every unit of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorCodec {
    key: u8,
}

impl XorCodec {
    #[inline(always)]
    pub const fn new(key: u8) -> Self {
        Self { key }
    }

    #[inline(always)]
    pub const fn key(&self) -> u8 {
        self.key
    }

    #[inline(always)]
    pub const fn encode(&self, byte: u8) -> u8 {
        byte ^ self.key
    }

    #[inline(always)]
    pub const fn decode(&self, byte: u8) -> u8 {
        byte ^ self.key
    }

    /// Encode a whole buffer in place.
    #[inline]
    pub fn encode_in_place(&self, buf: &mut [u8]) {
        for b in buf {
            *b ^= self.key;
        }
    }
}

impl Default for XorCodec {
    fn default() -> Self {
        Self::new(0x2A)
    }
}
