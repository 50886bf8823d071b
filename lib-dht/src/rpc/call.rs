//! Per-request bookkeeping: transaction id allocation and the state machine
//! a single outstanding call moves through.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::sync::oneshot;

use crate::constants::{RPC_CALL_TIMEOUT_BASELINE_MIN, RPC_CALL_TIMEOUT_MAX};
use crate::messages::Message;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallState {
    Unsent,
    Sent,
    Responded,
    Timeout,
    Error,
    /// Sent but showing no sign of a reply arriving in time to make the
    /// baseline deadline; escalated to `Timeout` if still unanswered once
    /// the hard ceiling passes.
    Stalled,
}

pub struct RpcCall {
    pub transaction_id: u32,
    pub target: SocketAddr,
    pub request: Message,
    pub state: CallState,
    pub sent_at: Option<Instant>,
    reply: Option<oneshot::Sender<Message>>,
}

impl RpcCall {
    fn new(transaction_id: u32, target: SocketAddr, request: Message) -> (Self, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        (
            RpcCall { transaction_id, target, request, state: CallState::Unsent, sent_at: None, reply: Some(tx) },
            rx,
        )
    }

    pub fn mark_sent(&mut self) {
        self.state = CallState::Sent;
        self.sent_at = Some(Instant::now());
    }

    pub fn mark_stalled(&mut self) {
        if self.state == CallState::Sent {
            self.state = CallState::Stalled;
        }
    }

    pub fn mark_timeout(&mut self) {
        self.state = CallState::Timeout;
    }

    pub fn complete(&mut self, response: Message) {
        self.state = CallState::Responded;
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(response);
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, CallState::Responded | CallState::Timeout | CallState::Error)
    }
}

/// Tracks adaptive per-remote-node round trip estimates and allocates
/// transaction ids, with a hard cap on concurrently outstanding calls.
pub struct CallRegistry {
    next_transaction_id: u32,
    calls: HashMap<u32, RpcCall>,
    rtt_estimates: HashMap<SocketAddr, Duration>,
    max_active: usize,
}

impl CallRegistry {
    pub fn new(max_active: usize) -> Self {
        CallRegistry {
            next_transaction_id: 1,
            calls: HashMap::new(),
            rtt_estimates: HashMap::new(),
            max_active,
        }
    }

    fn allocate_transaction_id(&mut self) -> u32 {
        loop {
            let id = self.next_transaction_id;
            self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
            if !self.calls.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.calls.values().filter(|c| !c.is_terminal()).count()
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_active
    }

    /// Timeout deadline for a call to `target`, derived from our running
    /// RTT estimate for it and clamped to `[baseline_min, max]`.
    pub fn timeout_for(&self, target: &SocketAddr) -> Duration {
        let estimate = self.rtt_estimates.get(target).copied().unwrap_or(RPC_CALL_TIMEOUT_BASELINE_MIN);
        (estimate * 2).clamp(RPC_CALL_TIMEOUT_BASELINE_MIN, RPC_CALL_TIMEOUT_MAX)
    }

    pub fn open(&mut self, target: SocketAddr, build_request: impl FnOnce(u32) -> Message) -> Option<(u32, oneshot::Receiver<Message>)> {
        if !self.has_capacity() {
            return None;
        }
        let transaction_id = self.allocate_transaction_id();
        let request = build_request(transaction_id);
        let (call, rx) = RpcCall::new(transaction_id, target, request);
        self.calls.insert(transaction_id, call);
        Some((transaction_id, rx))
    }

    pub fn request_bytes(&self, transaction_id: u32) -> Result<Vec<u8>> {
        self.calls
            .get(&transaction_id)
            .ok_or_else(|| anyhow!("unknown transaction id {transaction_id}"))?
            .request
            .to_bytes()
    }

    pub fn mark_sent(&mut self, transaction_id: u32) {
        if let Some(call) = self.calls.get_mut(&transaction_id) {
            call.mark_sent();
        }
    }

    /// Record a round trip observation and fold it into the running
    /// estimate for `target` (simple exponential smoothing).
    pub fn record_rtt(&mut self, target: SocketAddr, observed: Duration) {
        let entry = self.rtt_estimates.entry(target).or_insert(RPC_CALL_TIMEOUT_BASELINE_MIN);
        *entry = Duration::from_secs_f64(entry.as_secs_f64() * 0.75 + observed.as_secs_f64() * 0.25);
    }

    pub fn complete(&mut self, transaction_id: u32, response: Message) -> bool {
        if let Some(call) = self.calls.get_mut(&transaction_id) {
            if let Some(sent_at) = call.sent_at {
                self.rtt_estimates
                    .entry(call.target)
                    .and_modify(|rtt| *rtt = Duration::from_secs_f64(rtt.as_secs_f64() * 0.75 + sent_at.elapsed().as_secs_f64() * 0.25))
                    .or_insert_with(|| sent_at.elapsed());
            }
            call.complete(response);
            self.calls.remove(&transaction_id);
            true
        } else {
            false
        }
    }

    pub fn timeout(&mut self, transaction_id: u32) {
        if let Some(call) = self.calls.get_mut(&transaction_id) {
            call.mark_timeout();
        }
        self.calls.remove(&transaction_id);
    }

    pub fn sweep_stalled(&mut self, baseline: Duration) {
        for call in self.calls.values_mut() {
            if call.state == CallState::Sent {
                if let Some(sent_at) = call.sent_at {
                    if sent_at.elapsed() > baseline {
                        call.mark_stalled();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn transaction_ids_do_not_repeat_while_active() {
        let mut registry = CallRegistry::new(256);
        let (id1, _rx1) = registry.open(addr(), |t| Message::ping(t, random_id())).unwrap();
        let (id2, _rx2) = registry.open(addr(), |t| Message::ping(t, random_id())).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn capacity_limit_is_enforced() {
        let mut registry = CallRegistry::new(1);
        let (_id, _rx) = registry.open(addr(), |t| Message::ping(t, random_id())).unwrap();
        assert!(registry.open(addr(), |t| Message::ping(t, random_id())).is_none());
    }

    #[test]
    fn completing_a_call_frees_capacity() {
        let mut registry = CallRegistry::new(1);
        let (id, _rx) = registry.open(addr(), |t| Message::ping(t, random_id())).unwrap();
        registry.mark_sent(id);
        registry.complete(id, Message::ping(id, random_id()));
        assert!(registry.has_capacity());
    }

    fn random_id() -> crate::id::Id {
        crate::id::Id::random()
    }
}
