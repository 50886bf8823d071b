//! The generic iterative lookup driver, and `find_node` built directly on
//! top of it. `find_value`/`find_peer` reuse [`run_lookup`] with their own
//! request builder and result extractor.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::trace;

use crate::closest::{ClosestCandidates, ClosestSet};
use crate::constants::{K, MAX_CONCURRENT_TASK_REQUESTS};
use crate::id::Id;
use crate::lookup::LookupMode;
use crate::messages::{Message, ResponseBody};
use crate::node_info::NodeInfo;
use crate::routing_table::RoutingTable;
use crate::rpc::transport::UdpDhtTransport;
use crate::rpc::RpcServer;
use crate::token::Token;

/// Everything an iterative lookup accumulates along the way: the final
/// closest-K set, the write token each member issued (if any, i.e. the
/// lookup asked with `want_token`), and whichever `R` the caller's
/// extractor produced first (a value, a peer list, ...).
pub struct LookupOutcome<R> {
    pub closest: ClosestSet,
    pub tokens: Vec<(NodeInfo, Token)>,
    pub found: Option<R>,
}

/// Drive one iterative Kademlia lookup toward `target`.
///
/// `build_request` turns a transaction id and the queried contact into the
/// request to send it. `extract_contacts` pulls this address family's
/// contacts out of a response (e.g. `|r| r.nodes4.clone()` for an IPv4
/// instance). `extract_result` looks for a terminal answer (a value, a
/// matching peer list) in a response; once one is found an `Arbitrary`
/// lookup stops immediately, while `Optimistic`/`Conservative` keep
/// converging the closest set regardless.
pub async fn run_lookup<R, BuildReq, ExtractContacts, ExtractResult>(
    rpc: Arc<RpcServer<UdpDhtTransport>>,
    routing_table: Arc<Mutex<RoutingTable>>,
    local_id: Id,
    target: Id,
    mode: LookupMode,
    bootstrap: &[NodeInfo],
    mut build_request: BuildReq,
    extract_contacts: ExtractContacts,
    extract_result: ExtractResult,
) -> LookupOutcome<R>
where
    R: Send + 'static,
    BuildReq: FnMut(u32, &NodeInfo) -> Message + Send,
    ExtractContacts: Fn(&ResponseBody) -> Vec<NodeInfo>,
    ExtractResult: Fn(&ResponseBody) -> Option<R>,
{
    let mut candidates = ClosestCandidates::new(target, 3 * K);
    let mut closest = ClosestSet::new(target, K);
    let mut tokens: Vec<(NodeInfo, Token)> = Vec::new();
    let mut found: Option<R> = None;

    {
        let table = routing_table.lock().await;
        for entry in table.closest_entries(&target, 2 * K) {
            candidates.add(entry.info);
        }
    }
    if candidates.is_empty() {
        for info in bootstrap {
            candidates.add(*info);
        }
    }

    let mut in_flight: JoinSet<(NodeInfo, anyhow::Result<Message>)> = JoinSet::new();
    let mut queried: Vec<SocketAddr> = Vec::new();

    loop {
        while in_flight.len() < MAX_CONCURRENT_TASK_REQUESTS {
            let Some(next) = candidates.next_to_query() else { break };
            candidates.mark_pinged(&next.id);
            queried.push(next.socket_address);
            routing_table.lock().await.on_send(&next.id);

            let rpc = rpc.clone();
            let request = build_request(0, &next);
            in_flight.spawn(async move {
                let addr = next.socket_address;
                let result = rpc.call(addr, move |t| rewrite_transaction_id(request, t)).await;
                (next, result)
            });
        }

        if in_flight.is_empty() {
            if candidates.is_empty() || terminal(&closest, &candidates, mode) {
                break;
            }
            // No capacity freed and nothing left eligible this round.
            break;
        }

        let Some(joined) = in_flight.join_next().await else { break };
        let (contact, result) = match joined {
            Ok(pair) => pair,
            Err(_) => continue,
        };

        match result {
            Ok(Message::Response { r, .. }) => {
                trace!(from = %contact.socket_address, "lookup response");
                routing_table.lock().await.on_response(&contact.id);
                for found_contact in extract_contacts(&r) {
                    candidates.add(found_contact);
                    routing_table.lock().await.put(found_contact);
                }
                closest.insert(contact);
                if let Some(token) = r.token {
                    tokens.push((contact, token));
                }
                if found.is_none() {
                    if let Some(value) = extract_result(&r) {
                        found = Some(value);
                        if mode == LookupMode::Arbitrary {
                            break;
                        }
                    }
                }
            }
            Ok(_) => {
                // An error reply or a stray request; treat like a timeout.
                routing_table.lock().await.on_timeout(&contact.id);
            }
            Err(_) => {
                routing_table.lock().await.on_timeout(&contact.id);
                candidates.remove(&contact.id);
            }
        }

        if terminal(&closest, &candidates, mode) && in_flight.is_empty() {
            break;
        }
    }

    LookupOutcome { closest, tokens, found }
}

fn terminal(closest: &ClosestSet, candidates: &ClosestCandidates, mode: LookupMode) -> bool {
    if candidates.is_empty() {
        return true;
    }
    closest.is_stable(mode)
}

/// `build_request` closures are written against transaction id `0`; the
/// actual id is only known once [`RpcServer::call`] allocates one, so we
/// patch it back in before sending.
fn rewrite_transaction_id(message: Message, transaction_id: u32) -> Message {
    match message {
        Message::Request { v, m, a, .. } => Message::Request { t: transaction_id, v, m, a },
        other => other,
    }
}

/// `FIND_NODE`: locate the `K` nodes closest to `target`, as known across
/// the network rather than just this node's local table.
pub async fn lookup_nodes(
    rpc: Arc<RpcServer<UdpDhtTransport>>,
    routing_table: Arc<Mutex<RoutingTable>>,
    local_id: Id,
    target: Id,
    mode: LookupMode,
    bootstrap: &[NodeInfo],
    want_token: bool,
    contacts_of: impl Fn(&ResponseBody) -> Vec<NodeInfo> + Send + 'static,
) -> LookupOutcome<()> {
    run_lookup::<(), _, _, _>(
        rpc,
        routing_table,
        local_id,
        target,
        mode,
        bootstrap,
        move |_t, _contact| Message::find_node(0, local_id, target, want_token),
        contacts_of,
        |_r| None,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stability_requires_nonempty_candidates_check() {
        let target = Id::random();
        let closest = ClosestSet::new(target, K);
        let candidates = ClosestCandidates::new(target, 3 * K);
        assert!(terminal(&closest, &candidates, LookupMode::Arbitrary));
    }
}
