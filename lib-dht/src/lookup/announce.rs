//! `STORE_VALUE`/`ANNOUNCE_PEER`: the write-side follow-up to a `want_token`
//! node lookup. The lookup hands us the closest set together with each
//! member's issued token; we fire the actual write at each of them.

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::messages::Message;
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::rpc::transport::UdpDhtTransport;
use crate::rpc::RpcServer;
use crate::token::Token;
use crate::value::Value;

/// One storing node's outcome: `Ok(())` if it accepted the write, `Err` if
/// the RPC failed or it replied with an error.
pub struct StoreResult {
    pub node: NodeInfo,
    pub accepted: bool,
}

pub async fn store_value(
    rpc: Arc<RpcServer<UdpDhtTransport>>,
    local_id: crate::id::Id,
    value: Value,
    cas: Option<i64>,
    targets: Vec<(NodeInfo, Token)>,
) -> Vec<StoreResult> {
    let calls = targets.into_iter().map(|(node, token)| {
        let rpc = rpc.clone();
        let value = value.clone();
        async move {
            let addr = node.socket_address;
            let result =
                rpc.call(addr, move |t| Message::store_value(t, local_id, value, token, cas)).await;
            let accepted = matches!(result, Ok(Message::Response { .. }));
            if !accepted {
                debug!(peer = %addr, "store_value rejected or unreachable");
            }
            StoreResult { node, accepted }
        }
    });
    join_all(calls).await
}

pub async fn announce_peer(
    rpc: Arc<RpcServer<UdpDhtTransport>>,
    local_id: crate::id::Id,
    peer: PeerInfo,
    targets: Vec<(NodeInfo, Token)>,
) -> Vec<StoreResult> {
    let calls = targets.into_iter().map(|(node, token)| {
        let rpc = rpc.clone();
        let peer = peer.clone();
        async move {
            let addr = node.socket_address;
            let result = rpc.call(addr, move |t| Message::announce_peer(t, local_id, peer, token)).await;
            let accepted = matches!(result, Ok(Message::Response { .. }));
            if !accepted {
                debug!(peer = %addr, "announce_peer rejected or unreachable");
            }
            StoreResult { node, accepted }
        }
    });
    join_all(calls).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_result_tracks_acceptance() {
        let addr = "127.0.0.1:9000".parse().unwrap();
        let node = NodeInfo::new(crate::id::Id::random(), addr);
        let r = StoreResult { node, accepted: true };
        assert!(r.accepted);
    }
}
