//! `FIND_VALUE`: locate a stored value by id, validating every candidate
//! answer before accepting it.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::id::Id;
use crate::lookup::node_lookup::{run_lookup, LookupOutcome};
use crate::lookup::LookupMode;
use crate::messages::{Message, ResponseBody};
use crate::node_info::NodeInfo;
use crate::routing_table::RoutingTable;
use crate::rpc::transport::UdpDhtTransport;
use crate::rpc::RpcServer;
use crate::value::Value;

/// A responder's claimed value only counts if its id matches the target
/// (catches a corrupt or lying responder) and, for mutable values, its
/// signature verifies and its sequence number is at least `expected_sequence`.
fn validate(value: &Value, target: Id, expected_sequence: Option<i64>) -> bool {
    if value.id() != target {
        return false;
    }
    if !value.is_valid() {
        return false;
    }
    if let Some(expected) = expected_sequence {
        if value.sequence_number < expected {
            return false;
        }
    }
    true
}

pub async fn lookup_value(
    rpc: Arc<RpcServer<UdpDhtTransport>>,
    routing_table: Arc<Mutex<RoutingTable>>,
    local_id: Id,
    target: Id,
    mode: LookupMode,
    bootstrap: &[NodeInfo],
    expected_sequence: Option<i64>,
    contacts_of: impl Fn(&ResponseBody) -> Vec<NodeInfo> + Send + 'static,
) -> LookupOutcome<Value> {
    run_lookup(
        rpc,
        routing_table,
        local_id,
        target,
        mode,
        bootstrap,
        move |_t, _contact| Message::find_value(0, local_id, target, expected_sequence),
        contacts_of,
        move |r: &ResponseBody| {
            r.value.as_ref().filter(|v| validate(v, target, expected_sequence)).cloned()
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_id_mismatch() {
        let v = Value::new_immutable(b"hi".to_vec()).unwrap();
        let other = Id::random();
        assert!(!validate(&v, other, None));
    }

    #[test]
    fn validate_accepts_matching_immutable_value() {
        let v = Value::new_immutable(b"hi".to_vec()).unwrap();
        assert!(validate(&v, v.id(), None));
    }

    #[test]
    fn validate_rejects_stale_sequence() {
        use lib_crypto::classical::ed25519_keypair;
        let (pk_v, sk_v) = ed25519_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&pk_v);
        let mut sk = [0u8; 32];
        sk.copy_from_slice(&sk_v);
        let nonce = [1u8; crate::value::NONCE_BYTES];
        let v = Value::new_signed(pk, sk, nonce, 3, b"hi".to_vec()).unwrap();
        assert!(!validate(&v, v.id(), Some(4)));
        assert!(validate(&v, v.id(), Some(3)));
    }
}
