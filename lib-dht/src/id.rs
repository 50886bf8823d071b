//! 256-bit identifier algebra: equality, ordering, XOR distance, three-way
//! closeness comparison, leading-zero count, and hex/base58 codecs.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{NodeError, Result};

pub const ID_BYTES: usize = 32;

/// A 256-bit opaque identifier. Byte-wise big-endian; all arithmetic is
/// done byte-by-byte rather than via big-integer conversion, and comparisons
/// avoid early branches on secret-derived material where practical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id(pub [u8; ID_BYTES]);

impl Id {
    pub const MIN: Id = Id([0u8; ID_BYTES]);
    pub const MAX: Id = Id([0xffu8; ID_BYTES]);

    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Id(bytes)
    }

    /// Reinterpret this id as an Ed25519 public key (ids and Ed25519 keys
    /// share the same 32-byte representation).
    pub fn as_ed25519_public_key(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if stripped.len() != ID_BYTES * 2 {
            return Err(NodeError::invalid_argument(format!(
                "invalid id hex length: expected {} hex characters, got {}",
                ID_BYTES * 2,
                stripped.len()
            )));
        }
        let decoded = hex::decode(stripped)
            .map_err(|e| NodeError::invalid_argument(format!("invalid id hex: {e}")))?;
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&decoded);
        Ok(Id(bytes))
    }

    /// Canonical form: `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_base58(s: &str) -> Result<Self> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| NodeError::invalid_argument(format!("invalid id base58: {e}")))?;
        if decoded.len() != ID_BYTES {
            return Err(NodeError::invalid_argument(format!(
                "invalid id base58 length: expected {} bytes, got {}",
                ID_BYTES,
                decoded.len()
            )));
        }
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&decoded);
        Ok(Id(bytes))
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// XOR distance between two ids.
    pub fn distance(&self, other: &Id) -> Id {
        let mut out = [0u8; ID_BYTES];
        for i in 0..ID_BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        Id(out)
    }

    /// Number of leading zero bits in the big-endian representation.
    /// Returns `ID_BITS` only for the all-zero id (no set bit at all);
    /// conventionally treated as "maximally close" / identical.
    pub fn leading_zeros(&self) -> u32 {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return (i as u32) * 8 + byte.leading_zeros();
            }
        }
        (ID_BYTES as u32) * 8
    }

    /// Three-way comparison of closeness to `self`: the sign of
    /// `d(self,a) - d(self,b)`, computed from the first byte at which `a`
    /// and `b` differ (without materializing both full XOR distances).
    pub fn cmp_closer(&self, a: &Id, b: &Id) -> Ordering {
        for i in 0..ID_BYTES {
            if a.0[i] != b.0[i] {
                let da = a.0[i] ^ self.0[i];
                let db = b.0[i] ^ self.0[i];
                return da.cmp(&db);
            }
        }
        Ordering::Equal
    }

    /// True iff the first `n` bits of `self` and `other` agree. `n < 0` is
    /// vacuously true (matches a prefix covering the whole keyspace).
    pub fn bits_equal(&self, other: &Id, n: i32) -> bool {
        if n < 0 {
            return true;
        }
        let n = n as usize;
        let full_bytes = n / 8;
        let rem_bits = n % 8;
        if self.0[..full_bytes] != other.0[..full_bytes] {
            return false;
        }
        if rem_bits == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rem_bits);
        (self.0[full_bytes] & mask) == (other.0[full_bytes] & mask)
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::MIN
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_reflexive() {
        let a = Id::random();
        let b = Id::random();
        assert_eq!(a.distance(&a), Id::MIN);
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn distance_xor_chain() {
        let a = Id::random();
        let b = Id::random();
        let c = Id::random();
        let lhs = a.distance(&b).distance(&b.distance(&c));
        assert_eq!(lhs, a.distance(&c));
    }

    #[test]
    fn cmp_closer_matches_distance_sign() {
        let t = Id::random();
        let a = Id::random();
        let b = Id::random();
        let da = t.distance(&a);
        let db = t.distance(&b);
        assert_eq!(t.cmp_closer(&a, &b), da.cmp(&db));
    }

    #[test]
    fn bits_equal_weakens_monotonically() {
        let a = Id::random();
        let mut b_bytes = *a.as_bytes();
        b_bytes[10] ^= 0x01;
        let b = Id::from_bytes(b_bytes);
        // They differ somewhere in byte 10, so bits_equal must eventually
        // turn false as n grows, and once false it stays false.
        let mut seen_false = false;
        for n in 0..=256i32 {
            let eq = a.bits_equal(&b, n);
            if seen_false {
                assert!(!eq);
            }
            if !eq {
                seen_false = true;
            }
        }
        assert!(seen_false);
    }

    #[test]
    fn hex_roundtrip() {
        let id = Id::random();
        let hex = id.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(Id::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn hex_rejects_bad_length() {
        assert!(Id::from_hex("0xabcd").is_err());
    }

    #[test]
    fn base58_roundtrip() {
        let id = Id::random();
        let encoded = id.to_base58();
        assert_eq!(Id::from_base58(&encoded).unwrap(), id);
    }

    #[test]
    fn leading_zeros_known_values() {
        let mut bytes = [0u8; ID_BYTES];
        bytes[0] = 0b0010_0000;
        let id = Id::from_bytes(bytes);
        assert_eq!(id.leading_zeros(), 2);
    }
}
