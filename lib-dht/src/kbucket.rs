//! Routing-table node record (`KBucketEntry`) and the bucket container that
//! holds up to `K` of them for one prefix of the id space.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::constants::{K, KBUCKET_MAX_TIMEOUTS, KBUCKET_OLD_AND_STALE_TIME, KBUCKET_OLD_AND_STALE_TIMEOUTS, KBUCKET_RECENTLY_SEEN_WINDOW};
use crate::id::Id;
use crate::node_info::NodeInfo;
use crate::prefix::Prefix;

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct KBucketEntry {
    pub info: NodeInfo,
    pub created_at: u64,
    pub last_seen: u64,
    pub last_sent: u64,
    pub failed_requests: i32,
    pub reachable: bool,
}

impl KBucketEntry {
    pub fn new(info: NodeInfo) -> Self {
        let now = now_millis();
        KBucketEntry {
            info,
            created_at: now,
            last_seen: now,
            last_sent: 0,
            failed_requests: 0,
            reachable: false,
        }
    }

    pub fn id(&self) -> Id {
        self.info.id
    }

    pub fn is_never_contacted(&self) -> bool {
        self.last_sent == 0
    }

    /// Safe to hand out to other peers: verified at least once, tolerating
    /// one occasional timeout.
    pub fn is_eligible_for_nodes_list(&self) -> bool {
        self.reachable && self.failed_requests < 3
    }

    /// Allows an implicit first ping during a lookup.
    pub fn is_eligible_for_local_lookup(&self) -> bool {
        (self.reachable && self.failed_requests <= 3) || self.failed_requests <= 0
    }

    fn backoff_window(&self) -> Duration {
        if self.failed_requests <= 0 {
            return Duration::ZERO;
        }
        let exponent = (self.failed_requests.min(8)) as u32;
        Duration::from_secs(1 << exponent).min(KBUCKET_OLD_AND_STALE_TIME)
    }

    fn within_backoff_window(&self, now: u64) -> bool {
        let since_failure_reference = now.saturating_sub(self.last_seen);
        Duration::from_millis(since_failure_reference) < self.backoff_window()
    }

    /// False if recently seen (let NAT mappings time out) or still within
    /// backoff; otherwise true if there's an outstanding failure or the
    /// entry has gone unseen long enough to be old-and-stale.
    pub fn needs_ping(&self) -> bool {
        let now = now_millis();
        let since_seen = Duration::from_millis(now.saturating_sub(self.last_seen));
        if since_seen < KBUCKET_RECENTLY_SEEN_WINDOW || self.within_backoff_window(now) {
            return false;
        }
        self.failed_requests != 0 || since_seen > KBUCKET_OLD_AND_STALE_TIME
    }

    /// Describes entries surviving from a routing-table reload that never
    /// got re-verified.
    pub fn old_and_stale(&self) -> bool {
        let now = now_millis();
        self.failed_requests > KBUCKET_OLD_AND_STALE_TIMEOUTS
            && Duration::from_millis(now.saturating_sub(self.last_seen)) > KBUCKET_OLD_AND_STALE_TIME
    }

    /// Used by a full bucket's `put` to decide whether this entry may be
    /// evicted in favor of a new one.
    pub fn needs_replacement(&self) -> bool {
        (self.failed_requests > 1 && !self.reachable) || (self.failed_requests > KBUCKET_MAX_TIMEOUTS && self.old_and_stale())
    }

    /// An entry that keeps contacting us (bumping `last_seen` past
    /// `last_sent`) is kept around for backoff tracking even if it never
    /// answers our own requests; only entries silent since our last request
    /// to them are discarded outright.
    pub fn removable_without_replacement(&self) -> bool {
        let seen_since_last_ping = self.last_seen > self.last_sent;
        self.failed_requests > KBUCKET_MAX_TIMEOUTS && !seen_since_last_ping
    }

    pub fn signal_response(&mut self) {
        self.last_seen = now_millis();
        self.failed_requests = 0;
        self.reachable = true;
    }

    pub fn signal_request(&mut self) {
        self.last_sent = now_millis();
    }

    pub fn signal_request_timeout(&mut self) {
        self.failed_requests = if self.failed_requests <= 0 { 1 } else { self.failed_requests + 1 };
    }

    /// Merge another observation of the same `(id, address)` into this
    /// entry: earliest creation time, latest seen/sent, logical-OR
    /// reachability, minimum failure count.
    pub fn merge(&mut self, other: &KBucketEntry) {
        self.created_at = self.created_at.min(other.created_at);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.last_sent = self.last_sent.max(other.last_sent);
        self.reachable = self.reachable || other.reachable;
        self.failed_requests = self.failed_requests.min(other.failed_requests);
    }
}

/// Holds up to `K` entries all matching one prefix of the id space.
#[derive(Clone, Debug)]
pub struct KBucket {
    pub prefix: Prefix,
    pub is_home: bool,
    entries: Vec<KBucketEntry>,
    pub last_refresh_time: u64,
}

pub enum PutOutcome {
    Inserted,
    Updated,
    /// The bucket was full and the new entry was not admitted.
    Rejected,
    /// The home bucket must split before the entry can be (re)considered.
    NeedsSplit,
}

impl KBucket {
    pub fn new(prefix: Prefix, is_home: bool) -> Self {
        KBucket { prefix, is_home, entries: Vec::new(), last_refresh_time: now_millis() }
    }

    pub fn entries(&self) -> &[KBucketEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= K
    }

    pub fn find(&self, id: &Id) -> Option<&KBucketEntry> {
        self.entries.iter().find(|e| e.id() == *id)
    }

    pub fn find_by_address(&self, addr: &std::net::SocketAddr) -> Option<&KBucketEntry> {
        self.entries.iter().find(|e| &e.info.socket_address == addr)
    }

    /// Insert or update; does not implement the full `RoutingTable::put`
    /// eviction policy (that lives one level up, since it needs to decide
    /// between replacement, splitting, and discarding).
    pub fn insert_or_update(&mut self, entry: KBucketEntry) -> PutOutcome {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id() == entry.id()) {
            existing.merge(&entry);
            return PutOutcome::Updated;
        }
        if !self.is_full() {
            self.entries.push(entry);
            return PutOutcome::Inserted;
        }
        if let Some(idx) = self.entries.iter().position(|e| e.needs_replacement()) {
            self.entries[idx] = entry;
            return PutOutcome::Updated;
        }
        if self.is_home && self.prefix.is_splittable() {
            return PutOutcome::NeedsSplit;
        }
        if let Some((idx, _)) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.created_at)
        {
            if entry.created_at < self.entries[idx].created_at {
                self.entries[idx] = entry;
                return PutOutcome::Updated;
            }
        }
        PutOutcome::Rejected
    }

    pub fn remove(&mut self, id: &Id, force: bool) -> bool {
        if let Some(idx) = self.entries.iter().position(|e| e.id() == *id) {
            if force || self.entries[idx].removable_without_replacement() {
                self.entries.remove(idx);
                return true;
            }
        }
        false
    }

    pub fn on_send(&mut self, id: &Id) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.id() == *id) {
            e.signal_request();
        }
    }

    pub fn on_timeout(&mut self, id: &Id) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.id() == *id) {
            e.signal_request_timeout();
        }
    }

    pub fn on_response(&mut self, id: &Id) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.id() == *id) {
            e.signal_response();
        }
    }

    pub fn needs_refresh(&self, refresh_interval: Duration) -> bool {
        Duration::from_millis(now_millis().saturating_sub(self.last_refresh_time)) > refresh_interval
    }

    pub fn mark_refreshed(&mut self) {
        self.last_refresh_time = now_millis();
    }

    /// Split this bucket's entries into two children at `depth + 1`. The
    /// caller is responsible for replacing this bucket with the two
    /// results in the routing table.
    pub fn split(&self, local_home_side: Option<bool>) -> (KBucket, KBucket) {
        let lo_prefix = self.prefix.split(false);
        let hi_prefix = self.prefix.split(true);
        let mut lo = KBucket::new(lo_prefix, local_home_side == Some(false));
        let mut hi = KBucket::new(hi_prefix, local_home_side == Some(true));
        for entry in &self.entries {
            if lo_prefix.is_prefix_of(&entry.id()) {
                lo.entries.push(entry.clone());
            } else {
                hi.entries.push(entry.clone());
            }
        }
        (lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn entry(id: Id) -> KBucketEntry {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        KBucketEntry::new(NodeInfo::new(id, addr))
    }

    #[test]
    fn bucket_holds_at_most_k() {
        let mut bucket = KBucket::new(Prefix::WHOLE_KEYSPACE, true);
        for i in 0..K {
            let mut e = entry(Id::random());
            e.reachable = true;
            // Give each a distinct address so it's not deduped by address.
            e.info.socket_address = format!("127.0.0.1:{}", 5000 + i).parse().unwrap();
            assert!(matches!(bucket.insert_or_update(e), PutOutcome::Inserted));
        }
        assert_eq!(bucket.len(), K);
        assert!(bucket.is_full());
    }

    #[test]
    fn removable_without_replacement_requires_silence_since_last_send() {
        let mut e = entry(Id::random());
        e.failed_requests = KBUCKET_MAX_TIMEOUTS + 1;
        e.last_sent = 100;
        e.last_seen = 50;
        assert!(e.removable_without_replacement());

        e.last_seen = 150; // contacted us again after our last request
        assert!(!e.removable_without_replacement());
    }

    #[test]
    fn needs_replacement_for_unreachable_with_failures() {
        let mut e = entry(Id::random());
        e.reachable = false;
        e.failed_requests = 2;
        assert!(e.needs_replacement());

        e.reachable = true;
        e.failed_requests = 0;
        assert!(!e.needs_replacement());
    }

    #[test]
    fn signal_response_resets_failure_state() {
        let mut e = entry(Id::random());
        e.failed_requests = 3;
        e.reachable = false;
        e.signal_response();
        assert_eq!(e.failed_requests, 0);
        assert!(e.reachable);
    }
}
