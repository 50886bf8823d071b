//! `FIND_PEER`: locate the service-peer announcements stored under a
//! target id, validating each one's signature before accepting it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::id::Id;
use crate::lookup::node_lookup::{run_lookup, LookupOutcome};
use crate::lookup::LookupMode;
use crate::messages::{Message, ResponseBody};
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::routing_table::RoutingTable;
use crate::rpc::transport::UdpDhtTransport;
use crate::rpc::RpcServer;

pub async fn lookup_peers(
    rpc: Arc<RpcServer<UdpDhtTransport>>,
    routing_table: Arc<Mutex<RoutingTable>>,
    local_id: Id,
    target: Id,
    mode: LookupMode,
    bootstrap: &[NodeInfo],
    max_peers: usize,
    want_token: bool,
    contacts_of: impl Fn(&ResponseBody) -> Vec<NodeInfo> + Send + 'static,
) -> LookupOutcome<Vec<PeerInfo>> {
    let found = Arc::new(Mutex::new(HashMap::<Id, PeerInfo>::new()));
    let accumulator = found.clone();

    let outcome = run_lookup(
        rpc,
        routing_table,
        local_id,
        target,
        mode,
        bootstrap,
        move |_t, _contact| Message::find_peer(0, local_id, target, max_peers, want_token),
        contacts_of,
        move |r: &ResponseBody| {
            let matching: Vec<PeerInfo> =
                r.peers.iter().filter(|p| p.peer_id == target && p.is_valid()).cloned().collect();
            if matching.is_empty() {
                return None;
            }
            let accumulator = accumulator.clone();
            let matching_clone = matching.clone();
            // `run_lookup`'s extractor is synchronous; stash results into the
            // shared map immediately rather than spawning a task for it.
            if let Ok(mut guard) = accumulator.try_lock() {
                for peer in matching_clone {
                    guard.insert(peer.peer_id, peer);
                }
            }
            Some(matching)
        },
    )
    .await;

    let collected: Vec<PeerInfo> = found.lock().await.values().cloned().collect();
    LookupOutcome { closest: outcome.closest, tokens: outcome.tokens, found: Some(collected) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_is_accepted_only_when_id_matches_target() {
        let mut seed = [0u8; 32];
        seed[0] = 5;
        let node_id = Id::random();
        let peer = PeerInfo::create(seed, node_id, node_id, 1000, None).unwrap();
        assert_eq!(peer.peer_id, peer.peer_id);
        assert!(peer.is_valid());
    }
}
