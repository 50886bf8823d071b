//! Classical (non-post-quantum) cryptographic primitives: Ed25519 signing
//! and the X25519 key agreement used to build sealed-box encryption.

pub mod ed25519;
pub mod x25519;

pub use ed25519::*;
pub use x25519::{ed25519_pk_to_x25519, ed25519_sk_to_x25519, generate_nonce as x25519_nonce, open as seal_open, seal};
