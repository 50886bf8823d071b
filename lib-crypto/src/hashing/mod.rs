//! Hashing primitives: BLAKE3 (keyed) for the token secret's MAC, SHA-256
//! for content-addressed value identifiers.

pub mod sha256;

pub use sha256::{hash_sha256, hash_sha256_multiple};

/// Hash with a caller-supplied key; used to derive write tokens without
/// keeping per-requester state.
pub fn hash_blake3_keyed(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    blake3::keyed_hash(key, data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_hash_differs_by_key() {
        let data = b"same preimage";
        let a = hash_blake3_keyed(&[1u8; 32], data);
        let b = hash_blake3_keyed(&[2u8; 32], data);
        assert_ne!(a, b);
    }

    #[test]
    fn keyed_hash_is_deterministic() {
        let data = b"same preimage";
        let key = [7u8; 32];
        assert_eq!(hash_blake3_keyed(&key, data), hash_blake3_keyed(&key, data));
    }
}
