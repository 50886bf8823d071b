//! Self-certifying service-announcement records.

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::id::Id;
use crate::value::SIGNATURE_BYTES;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub struct PeerInfo {
    pub peer_id: Id,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub private_key: Option<[u8; 32]>,
    pub node_id: Id,
    /// Equal to `node_id` unless announced on behalf of another node
    /// (delegated), in which case this is the delegate's id.
    pub origin_id: Id,
    pub port: u16,
    pub alternative_url: Option<String>,
    pub signature: [u8; SIGNATURE_BYTES],
}

impl PeerInfo {
    pub fn is_delegated(&self) -> bool {
        self.origin_id != self.node_id
    }

    pub fn sign_data(node_id: &Id, origin_id: &Id, port: u16, alternative_url: Option<&str>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(node_id.as_bytes());
        out.extend_from_slice(origin_id.as_bytes());
        out.extend_from_slice(&port.to_be_bytes());
        if let Some(url) = alternative_url {
            out.extend_from_slice(url.as_bytes());
        }
        out
    }

    pub fn create(
        peer_private_key: [u8; 32],
        node_id: Id,
        origin_id: Id,
        port: u16,
        alternative_url: Option<String>,
    ) -> Result<Self> {
        if port == 0 {
            return Err(NodeError::invalid_argument("peer port must be in (0, 65535]"));
        }
        let peer_public_key = {
            let (pk, _) = lib_crypto::classical::ed25519::ed25519_keypair_from_seed(&peer_private_key);
            let mut out = [0u8; 32];
            out.copy_from_slice(&pk);
            out
        };
        let peer_id = Id::from_bytes(peer_public_key);
        let data = Self::sign_data(&node_id, &origin_id, port, alternative_url.as_deref());
        let sig = lib_crypto::ed25519_sign(&data, &peer_private_key)
            .map_err(|e| NodeError::crypto(e.to_string()))?;
        let mut signature = [0u8; SIGNATURE_BYTES];
        signature.copy_from_slice(&sig);

        Ok(PeerInfo {
            peer_id,
            private_key: Some(peer_private_key),
            node_id,
            origin_id,
            port,
            alternative_url,
            signature,
        })
    }

    pub fn is_valid(&self) -> bool {
        if self.port == 0 {
            return false;
        }
        let data = Self::sign_data(&self.node_id, &self.origin_id, self.port, self.alternative_url.as_deref());
        lib_crypto::ed25519_verify(&data, &self.signature, self.peer_id.as_bytes()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_peer_info_is_valid_and_self_delegated() {
        let mut seed = [0u8; 32];
        seed[0] = 42;
        let node_id = Id::random();
        let peer = PeerInfo::create(seed, node_id, node_id, 42244, Some("https://x.example".to_string())).unwrap();
        assert!(peer.is_valid());
        assert!(!peer.is_delegated());
        assert_eq!(peer.port, 42244);
    }

    #[test]
    fn tampered_peer_info_is_invalid() {
        let mut seed = [0u8; 32];
        seed[0] = 7;
        let node_id = Id::random();
        let mut peer = PeerInfo::create(seed, node_id, node_id, 1234, None).unwrap();
        peer.port = 4321;
        assert!(!peer.is_valid());
    }

    #[test]
    fn delegated_peer_has_different_origin() {
        let mut seed = [0u8; 32];
        seed[0] = 9;
        let node_id = Id::random();
        let origin_id = Id::random();
        let peer = PeerInfo::create(seed, node_id, origin_id, 80, None).unwrap();
        assert!(peer.is_delegated());
        assert!(peer.is_valid());
    }

    #[test]
    fn zero_port_is_rejected() {
        let seed = [1u8; 32];
        let node_id = Id::random();
        assert!(PeerInfo::create(seed, node_id, node_id, 0, None).is_err());
    }
}
