//! X25519 key conversion and sealed-box (libsodium `crypto_box`-compatible)
//! encryption built from Ed25519 keys.
//!
//! An Ed25519 signing key doubles as an X25519 key exchange key via the
//! standard conversion: the secret scalar is the first 32 bytes of
//! SHA-512(seed), clamped; the public point is the Edwards point converted to
//! its Montgomery u-coordinate.

use anyhow::{anyhow, Result};
use crypto_box::{aead::Aead, PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey};
use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha512};

pub const NONCE_BYTES: usize = 24;

/// Derive the X25519 secret scalar from an Ed25519 signing key seed.
pub fn ed25519_sk_to_x25519(seed: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    hasher.update(seed);
    let hash = hasher.finalize();

    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&hash[..32]);
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
    scalar
}

/// Derive the X25519 public point from an Ed25519 verifying key.
pub fn ed25519_pk_to_x25519(public_key: &[u8]) -> Result<[u8; 32]> {
    if public_key.len() != 32 {
        return Err(anyhow!("invalid Ed25519 public key length"));
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(public_key);

    let compressed = CompressedEdwardsY(bytes);
    let point = compressed
        .decompress()
        .ok_or_else(|| anyhow!("point is not a valid Ed25519 public key"))?;
    Ok(point.to_montgomery().to_bytes())
}

/// Generate a fresh random nonce suitable for `seal`/`open`.
pub fn generate_nonce() -> [u8; NONCE_BYTES] {
    let mut nonce = [0u8; NONCE_BYTES];
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` for `recipient_x25519_pk` under `sender_x25519_sk`,
/// using the supplied nonce (shared with the containing record).
pub fn seal(
    plaintext: &[u8],
    nonce: &[u8; NONCE_BYTES],
    recipient_x25519_pk: &[u8; 32],
    sender_x25519_sk: &[u8; 32],
) -> Result<Vec<u8>> {
    let sk = BoxSecretKey::from(*sender_x25519_sk);
    let pk = BoxPublicKey::from(*recipient_x25519_pk);
    let cbox = SalsaBox::new(&pk, &sk);
    cbox.encrypt(nonce.into(), plaintext)
        .map_err(|_| anyhow!("sealed-box encryption failed"))
}

/// Decrypt a payload produced by [`seal`].
pub fn open(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_BYTES],
    sender_x25519_pk: &[u8; 32],
    recipient_x25519_sk: &[u8; 32],
) -> Result<Vec<u8>> {
    let sk = BoxSecretKey::from(*recipient_x25519_sk);
    let pk = BoxPublicKey::from(*sender_x25519_pk);
    let cbox = SalsaBox::new(&pk, &sk);
    cbox.decrypt(nonce.into(), ciphertext)
        .map_err(|_| anyhow!("sealed-box decryption failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classical::ed25519::ed25519_keypair;

    #[test]
    fn test_roundtrip_via_ed25519_keys() {
        let (owner_pk, owner_sk_bytes) = ed25519_keypair();
        let (recipient_pk, recipient_sk_bytes) = ed25519_keypair();

        let mut owner_sk = [0u8; 32];
        owner_sk.copy_from_slice(&owner_sk_bytes);
        let mut recipient_sk = [0u8; 32];
        recipient_sk.copy_from_slice(&recipient_sk_bytes);

        let owner_x_sk = ed25519_sk_to_x25519(&owner_sk);
        let owner_x_pk = ed25519_pk_to_x25519(&owner_pk).unwrap();
        let recipient_x_sk = ed25519_sk_to_x25519(&recipient_sk);
        let recipient_x_pk = ed25519_pk_to_x25519(&recipient_pk).unwrap();

        let nonce = generate_nonce();
        let plaintext = b"hello recipient";
        let sealed = seal(plaintext, &nonce, &recipient_x_pk, &owner_x_sk).unwrap();

        let opened = open(&sealed, &nonce, &owner_x_pk, &recipient_x_sk).unwrap();
        assert_eq!(opened, plaintext);

        // A third party's key must not open it.
        let (_, other_sk_bytes) = ed25519_keypair();
        let mut other_sk = [0u8; 32];
        other_sk.copy_from_slice(&other_sk_bytes);
        let other_x_sk = ed25519_sk_to_x25519(&other_sk);
        assert!(open(&sealed, &nonce, &owner_x_pk, &other_x_sk).is_err());
    }
}
