//! Write tokens: proof that a requester previously received a `find_node`
//! (or similar) response from us before we'll accept their `store_value` or
//! `announce_peer`, without keeping per-requester state.
//!
//! A token is a keyed hash of the requester's address under a secret that
//! rotates every [`crate::constants::TOKEN_TIMEOUT`]; the previous secret is
//! kept around for one more rotation so tokens handed out just before a
//! rotation still validate.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::id::Id;

pub const TOKEN_BYTES: usize = 4;
pub type Token = [u8; TOKEN_BYTES];

fn compute(secret: &[u8; 32], addr: &SocketAddr, id: &Id) -> Token {
    let addr_bytes = match addr {
        SocketAddr::V4(v4) => {
            let mut b = v4.ip().octets().to_vec();
            b.extend_from_slice(&v4.port().to_be_bytes());
            b
        }
        SocketAddr::V6(v6) => {
            let mut b = v6.ip().octets().to_vec();
            b.extend_from_slice(&v6.port().to_be_bytes());
            b
        }
    };
    let mut preimage = addr_bytes;
    preimage.extend_from_slice(id.as_bytes());
    let full = lib_crypto::hash_blake3_keyed(secret, &preimage);
    let mut out = [0u8; TOKEN_BYTES];
    out.copy_from_slice(&full[..TOKEN_BYTES]);
    out
}

pub struct TokenManager {
    current_secret: [u8; 32],
    previous_secret: [u8; 32],
    rotation_period: Duration,
    last_rotation: Instant,
}

impl TokenManager {
    pub fn new(rotation_period: Duration) -> Self {
        let mut current_secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut current_secret);
        TokenManager {
            current_secret,
            previous_secret: current_secret,
            rotation_period,
            last_rotation: Instant::now(),
        }
    }

    pub fn maybe_rotate(&mut self) {
        if self.last_rotation.elapsed() >= self.rotation_period {
            self.previous_secret = self.current_secret;
            let mut next = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut next);
            self.current_secret = next;
            self.last_rotation = Instant::now();
        }
    }

    pub fn generate(&self, requester: &SocketAddr, requester_id: &Id) -> Token {
        compute(&self.current_secret, requester, requester_id)
    }

    /// Valid against either the current or the immediately prior secret, so
    /// a token issued right before a rotation still works for up to
    /// `2 * rotation_period`.
    pub fn verify(&self, requester: &SocketAddr, requester_id: &Id, token: &Token) -> bool {
        compute(&self.current_secret, requester, requester_id) == *token
            || compute(&self.previous_secret, requester, requester_id) == *token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_verifies_for_same_requester() {
        let mgr = TokenManager::new(Duration::from_secs(300));
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let id = Id::random();
        let token = mgr.generate(&addr, &id);
        assert!(mgr.verify(&addr, &id, &token));
    }

    #[test]
    fn token_rejects_different_requester() {
        let mgr = TokenManager::new(Duration::from_secs(300));
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let other: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        let id = Id::random();
        let token = mgr.generate(&addr, &id);
        assert!(!mgr.verify(&other, &id, &token));
    }

    #[test]
    fn token_survives_one_rotation() {
        let mut mgr = TokenManager::new(Duration::from_millis(0));
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let id = Id::random();
        let token = mgr.generate(&addr, &id);
        mgr.maybe_rotate();
        assert!(mgr.verify(&addr, &id, &token));
    }
}
