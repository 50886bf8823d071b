//! Cryptographic primitives used by the DHT overlay: Ed25519 signing,
//! X25519-derived sealed-box encryption, and SHA-256/BLAKE3 hashing.

pub mod classical;
pub mod hashing;

// Re-export hashing functionality
pub use hashing::{hash_blake3_keyed, hash_sha256, hash_sha256_multiple};

// Re-export X25519 sealed-box functionality
pub use classical::{ed25519_pk_to_x25519, ed25519_sk_to_x25519, seal, seal_open, x25519_nonce};

// Re-export Ed25519 signing functionality
pub use classical::{ed25519_keypair, ed25519_keypair_from_seed, ed25519_sign, ed25519_verify};
