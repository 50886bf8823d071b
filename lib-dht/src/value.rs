//! Self-certifying value records: immutable, signed-mutable, and encrypted
//! mutable variants, with their crypto invariants.

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::id::Id;

pub const NONCE_BYTES: usize = 24;
pub const SIGNATURE_BYTES: usize = 64;

#[derive(Clone, Serialize, Deserialize)]
pub struct Value {
    pub public_key: Option<[u8; 32]>,
    /// Held only by the owner; never serialized to the wire.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub private_key: Option<[u8; 32]>,
    pub recipient: Option<Id>,
    pub nonce: Option<[u8; NONCE_BYTES]>,
    pub sequence_number: i64,
    pub signature: Option<[u8; SIGNATURE_BYTES]>,
    pub data: Vec<u8>,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
            && self.recipient == other.recipient
            && self.signature == other.signature
            && self.nonce == other.nonce
            && self.data == other.data
            && self.sequence_number == other.sequence_number
    }
}
impl Eq for Value {}

impl Value {
    pub fn is_mutable(&self) -> bool {
        self.public_key.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.recipient.is_some()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// `id = SHA-256(data)` for immutable values, `SHA-256(public_key ∥
    /// nonce)` for mutable ones.
    pub fn calculate_id(public_key: Option<&[u8; 32]>, nonce: Option<&[u8; NONCE_BYTES]>, data: &[u8]) -> Id {
        match public_key {
            None => Id::from_bytes(lib_crypto::hash_sha256(data)),
            Some(pk) => {
                let nonce = nonce.expect("mutable value must carry a nonce");
                Id::from_bytes(lib_crypto::hash_sha256_multiple(&[pk, nonce]))
            }
        }
    }

    pub fn id(&self) -> Id {
        Self::calculate_id(self.public_key.as_ref(), self.nonce.as_ref(), &self.data)
    }

    /// Bytes covered by the signature: `(recipient? ∥ nonce ∥
    /// sequence_number ∥ data)`, with the sequence number encoded as a
    /// portable fixed-width little-endian i64.
    pub fn sign_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(recipient) = &self.recipient {
            out.extend_from_slice(recipient.as_bytes());
        }
        if let Some(nonce) = &self.nonce {
            out.extend_from_slice(nonce);
        }
        out.extend_from_slice(&self.sequence_number.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn new_immutable(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(NodeError::invalid_argument("immutable value data must not be empty"));
        }
        Ok(Value {
            public_key: None,
            private_key: None,
            recipient: None,
            nonce: None,
            sequence_number: 0,
            signature: None,
            data,
        })
    }

    pub fn new_signed(
        public_key: [u8; 32],
        private_key: [u8; 32],
        nonce: [u8; NONCE_BYTES],
        sequence_number: i64,
        data: Vec<u8>,
    ) -> Result<Self> {
        Self::build_signed(public_key, private_key, None, nonce, sequence_number, data)
    }

    pub fn new_encrypted(
        public_key: [u8; 32],
        private_key: [u8; 32],
        recipient: Id,
        nonce: [u8; NONCE_BYTES],
        sequence_number: i64,
        plaintext: &[u8],
    ) -> Result<Self> {
        let owner_x_sk = lib_crypto::ed25519_sk_to_x25519(&private_key);
        let recipient_x_pk = lib_crypto::ed25519_pk_to_x25519(recipient.as_bytes())
            .map_err(|e| NodeError::crypto(e.to_string()))?;
        let sealed = lib_crypto::seal(plaintext, &nonce, &recipient_x_pk, &owner_x_sk)
            .map_err(|e| NodeError::crypto(e.to_string()))?;
        Self::build_signed(public_key, private_key, Some(recipient), nonce, sequence_number, sealed)
    }

    fn build_signed(
        public_key: [u8; 32],
        private_key: [u8; 32],
        recipient: Option<Id>,
        nonce: [u8; NONCE_BYTES],
        sequence_number: i64,
        data: Vec<u8>,
    ) -> Result<Self> {
        if sequence_number < 0 {
            return Err(NodeError::invalid_argument("sequence number must be >= 0"));
        }
        let mut value = Value {
            public_key: Some(public_key),
            private_key: Some(private_key),
            recipient,
            nonce: Some(nonce),
            sequence_number,
            signature: None,
            data,
        };
        let sign_data = value.sign_data();
        let sig = lib_crypto::ed25519_sign(&sign_data, &private_key)
            .map_err(|e| NodeError::crypto(e.to_string()))?;
        let mut sig_bytes = [0u8; SIGNATURE_BYTES];
        sig_bytes.copy_from_slice(&sig);
        value.signature = Some(sig_bytes);
        Ok(value)
    }

    /// Produce the value for sequence `n+1`, reusing `public_key`, `nonce`,
    /// and `recipient`. Requires the owner's private key.
    pub fn update(&self, new_data: Vec<u8>) -> Result<Self> {
        let private_key = self
            .private_key
            .ok_or_else(|| NodeError::state(format!("not the owner of value {}", self.id())))?;
        let public_key = self.public_key.expect("mutable value must carry a public key");
        let nonce = self.nonce.expect("mutable value must carry a nonce");
        let next_seq = self.sequence_number + 1;

        if let Some(recipient) = self.recipient {
            Value::new_encrypted(public_key, private_key, recipient, nonce, next_seq, &new_data)
        } else {
            Value::new_signed(public_key, private_key, nonce, next_seq, new_data)
        }
    }

    /// Decrypt an encrypted-mutable value's payload with the recipient's
    /// Ed25519 signing seed. Returns an error for any other value shape or
    /// if decryption fails (wrong key, tampering).
    pub fn decrypt(&self, recipient_private_key: &[u8; 32]) -> Result<Vec<u8>> {
        let recipient = self
            .recipient
            .ok_or_else(|| NodeError::invalid_argument("value is not encrypted"))?;
        let public_key = self.public_key.ok_or_else(|| NodeError::invalid_argument("value is not mutable"))?;
        let nonce = self.nonce.ok_or_else(|| NodeError::invalid_argument("value has no nonce"))?;
        let _ = recipient; // the recipient id is the public key of the decrypting party

        let recipient_x_sk = lib_crypto::ed25519_sk_to_x25519(recipient_private_key);
        let owner_x_pk =
            lib_crypto::ed25519_pk_to_x25519(&public_key).map_err(|e| NodeError::crypto(e.to_string()))?;
        lib_crypto::seal_open(&self.data, &nonce, &owner_x_pk, &recipient_x_sk)
            .map_err(|e| NodeError::crypto(e.to_string()))
    }

    /// `is_valid()`: immutable values are valid iff non-empty; mutable
    /// values additionally require a well-formed nonce/signature that
    /// verifies under `public_key`.
    pub fn is_valid(&self) -> bool {
        match self.public_key {
            None => !self.data.is_empty(),
            Some(pk) => {
                let nonce_ok = self.nonce.is_some();
                let sig = match &self.signature {
                    Some(sig) => sig,
                    None => return false,
                };
                if !nonce_ok {
                    return false;
                }
                let sign_data = self.sign_data();
                lib_crypto::ed25519_verify(&sign_data, sig, &pk).unwrap_or(false)
            }
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Value");
        d.field("id", &self.id());
        d.field("sequence_number", &self.sequence_number);
        if let Some(pk) = &self.public_key {
            d.field("public_key", &hex::encode(pk));
        }
        if self.is_encrypted() {
            d.field("recipient", &self.recipient);
        }
        if self.is_signed() {
            d.field("signature", &self.signature.map(hex::encode));
        }
        d.field("data_len", &self.data.len());
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_crypto::classical::ed25519_keypair;

    fn keypair() -> ([u8; 32], [u8; 32]) {
        let (pk, sk) = ed25519_keypair();
        let mut pkb = [0u8; 32];
        pkb.copy_from_slice(&pk);
        let mut skb = [0u8; 32];
        skb.copy_from_slice(&sk);
        (pkb, skb)
    }

    #[test]
    fn immutable_id_is_sha256_of_data() {
        let v = Value::new_immutable(vec![0, 1, 2, 3, 4]).unwrap();
        assert_eq!(v.id(), Id::from_bytes(lib_crypto::hash_sha256(&v.data)));
        assert!(v.is_valid());
        assert!(!v.is_mutable());
        assert_eq!(v.sequence_number, 0);
    }

    #[test]
    fn signed_value_verifies() {
        let (pk, sk) = keypair();
        let nonce = [7u8; NONCE_BYTES];
        let v = Value::new_signed(pk, sk, nonce, 0, b"hello".to_vec()).unwrap();
        assert!(v.is_valid());
        assert!(v.is_mutable());
        assert!(!v.is_encrypted());
    }

    #[test]
    fn update_bumps_sequence_and_preserves_identity() {
        let (pk, sk) = keypair();
        let nonce = [9u8; NONCE_BYTES];
        let v1 = Value::new_signed(pk, sk, nonce, 0, b"hello".to_vec()).unwrap();
        let v2 = v1.update(b"hello2".to_vec()).unwrap();
        assert_eq!(v2.sequence_number, 1);
        assert_eq!(v2.public_key, v1.public_key);
        assert_eq!(v2.nonce, v1.nonce);
        assert_eq!(v2.recipient, v1.recipient);
        assert_eq!(v2.id(), v1.id());
        assert!(v2.is_valid());
    }

    #[test]
    fn encrypted_value_only_recipient_can_decrypt() {
        let (owner_pk, owner_sk) = keypair();
        let (recipient_pk, recipient_sk) = keypair();
        let recipient_id = Id::from_bytes(recipient_pk);
        let nonce = [3u8; NONCE_BYTES];

        let v = Value::new_encrypted(owner_pk, owner_sk, recipient_id, nonce, 0, b"secret payload").unwrap();
        assert!(v.is_valid());
        assert!(v.is_encrypted());

        let plaintext = v.decrypt(&recipient_sk).unwrap();
        assert_eq!(plaintext, b"secret payload");

        let (_, wrong_sk) = keypair();
        assert!(v.decrypt(&wrong_sk).is_err());
    }

    #[test]
    fn update_without_private_key_fails() {
        let (pk, sk) = keypair();
        let nonce = [1u8; NONCE_BYTES];
        let mut v = Value::new_signed(pk, sk, nonce, 0, b"hello".to_vec()).unwrap();
        v.private_key = None;
        assert!(v.update(b"nope".to_vec()).is_err());
    }
}
