//! Plain node contact information as exchanged on the wire.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::id::Id;

/// Two-byte implementation code plus a 16-bit version number, advertised for
/// diagnostics only — no behavior is gated on it beyond rejecting a field
/// that fails to parse at all.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Version {
    pub name: [u8; 2],
    pub number: u16,
}

impl Version {
    pub const CURRENT: Version = Version { name: *b"CR", number: 1 };
}

impl Default for Version {
    fn default() -> Self {
        Version::CURRENT
    }
}

/// Strips any IPv6 scope id from a socket address before persistence or
/// comparison (addresses are compared without scope ids).
pub fn normalize_addr(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => {
            let stripped = std::net::SocketAddrV6::new(*v6.ip(), v6.port(), 0, 0);
            SocketAddr::V6(stripped)
        }
        other => other,
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: Id,
    pub socket_address: SocketAddr,
    pub version: Version,
}

impl NodeInfo {
    pub fn new(id: Id, socket_address: SocketAddr) -> Self {
        NodeInfo {
            id,
            socket_address: normalize_addr(socket_address),
            version: Version::CURRENT,
        }
    }

    pub fn with_version(id: Id, socket_address: SocketAddr, version: Version) -> Self {
        NodeInfo {
            id,
            socket_address: normalize_addr(socket_address),
            version,
        }
    }

    /// A node "matches" another if both id and address agree; used by
    /// conflict detection to tell an honest re-announce from a hijack
    /// attempt (same id, different address, or vice versa).
    pub fn matches(&self, other: &NodeInfo) -> bool {
        self.id == other.id && self.socket_address == other.socket_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_id_is_stripped() {
        let addr: SocketAddr = "[fe80::1%5]:1234".parse().unwrap_or_else(|_| {
            // Not all std versions parse the %scope syntax directly; fall
            // back to constructing it explicitly.
            SocketAddr::V6(std::net::SocketAddrV6::new(
                "fe80::1".parse().unwrap(),
                1234,
                0,
                5,
            ))
        });
        let normalized = normalize_addr(addr);
        if let SocketAddr::V6(v6) = normalized {
            assert_eq!(v6.scope_id(), 0);
        } else {
            panic!("expected v6 address");
        }
    }
}
