//! Correlation ids — sortable, unique identifiers assigned to each logged
//! exchange.
//!
//! Shaped like a ULID: a 48-bit millisecond timestamp in the high bits
//! followed by 80 bits of random entropy, packed into a `u128` so ids
//! compare and sort by creation time without needing a separate index.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

const ENCODING: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ENCODED_LEN: usize = 26;

/// A time-sortable correlation id assigned to a logged request/response pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u128);

impl CorrelationId {
    /// Builds a new id from an explicit millisecond timestamp, generating
    /// fresh random entropy for the low 80 bits.
    pub fn new(timestamp_ms: u64) -> Self {
        let mut entropy = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut entropy);
        Self::from_parts(timestamp_ms, entropy)
    }

    fn from_parts(timestamp_ms: u64, entropy: [u8; 10]) -> Self {
        let ts = (timestamp_ms & 0xFFFF_FFFF_FFFF) as u128;
        let mut value = ts << 80;
        for (i, byte) in entropy.iter().enumerate() {
            value |= (*byte as u128) << (8 * (9 - i));
        }
        Self(value)
    }

    pub fn timestamp_ms(&self) -> u64 {
        (self.0 >> 80) as u64
    }

    /// Encodes the id as a 26-character Crockford base32 string.
    pub fn encode(&self) -> String {
        let mut out = vec![0u8; ENCODED_LEN];
        let mut value = self.0;
        for slot in out.iter_mut().rev() {
            *slot = ENCODING[(value & 0x1F) as usize];
            value >>= 5;
        }
        String::from_utf8(out).expect("encoding table is ASCII")
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
