//! A routing table tiling the whole id space with k-buckets, splitting the
//! home branch on demand and merging siblings back together during
//! maintenance once they're sparse enough to fit in one bucket again.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::K;
use crate::id::Id;
use crate::kbucket::{KBucket, KBucketEntry, PutOutcome};
use crate::node_info::NodeInfo;
use crate::prefix::Prefix;

pub enum PutResult {
    Inserted,
    Updated,
    Ignored,
}

/// Buckets kept in ascending prefix order; together they tile the keyspace
/// (every id matches exactly one).
pub struct RoutingTable {
    local_id: Id,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_id: Id) -> Self {
        RoutingTable {
            local_id,
            buckets: vec![KBucket::new(Prefix::WHOLE_KEYSPACE, true)],
        }
    }

    pub fn local_id(&self) -> Id {
        self.local_id
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }

    fn bucket_index_for(&self, id: &Id) -> usize {
        self.buckets
            .iter()
            .position(|b| b.prefix.is_prefix_of(id))
            .expect("buckets tile the whole keyspace")
    }

    pub fn find(&self, id: &Id) -> Option<&KBucketEntry> {
        self.buckets[self.bucket_index_for(id)].find(id)
    }

    /// Conflict-checked insert: a new sighting of `(id, address)` that
    /// contradicts an existing entry for the same id (different address) or
    /// the same address (different id) is logged and dropped rather than
    /// overwriting the incumbent.
    pub fn put(&mut self, info: NodeInfo) -> PutResult {
        if info.id == self.local_id {
            return PutResult::Ignored;
        }
        let idx = self.bucket_index_for(&info.id);
        if let Some(existing) = self.buckets[idx].find(&info.id) {
            if existing.info.socket_address != info.socket_address {
                warn!(id = %info.id, old = %existing.info.socket_address, new = %info.socket_address, "routing table conflict: same id, different address, keeping existing");
                return PutResult::Ignored;
            }
        }
        if let Some(conflict) = self.find_by_address(&info.socket_address) {
            if conflict.id() != info.id {
                warn!(address = %info.socket_address, old = %conflict.id(), new = %info.id, "routing table conflict: same address, different id, keeping existing");
                return PutResult::Ignored;
            }
        }

        let entry = KBucketEntry::new(info);
        match self.buckets[idx].insert_or_update(entry.clone()) {
            PutOutcome::Inserted => PutResult::Inserted,
            PutOutcome::Updated => PutResult::Updated,
            PutOutcome::Rejected => PutResult::Ignored,
            PutOutcome::NeedsSplit => {
                self.split_bucket(idx);
                let idx = self.bucket_index_for(&entry.id());
                match self.buckets[idx].insert_or_update(entry) {
                    PutOutcome::Inserted => PutResult::Inserted,
                    PutOutcome::Updated => PutResult::Updated,
                    _ => PutResult::Ignored,
                }
            }
        }
    }

    fn find_by_address(&self, addr: &SocketAddr) -> Option<&KBucketEntry> {
        self.buckets.iter().find_map(|b| b.find_by_address(addr))
    }

    /// Split the home bucket at `idx` into two, keeping the new home on
    /// whichever side still matches `local_id`. Only the home bucket is ever
    /// split: no other bucket can grow enough new neighbors to warrant it,
    /// since contacts only enter the table via lookups converging on
    /// `local_id`.
    fn split_bucket(&mut self, idx: usize) {
        let bucket = &self.buckets[idx];
        if !bucket.is_home || !bucket.prefix.is_splittable() {
            return;
        }
        let local_home_side = crate::prefix::bit_at(&self.local_id, bucket.prefix.depth() + 1);
        let (lo, hi) = bucket.split(Some(local_home_side));
        debug!(old = %bucket.prefix, "splitting home bucket");
        self.buckets.splice(idx..=idx, [lo, hi]);
    }

    pub fn on_send(&mut self, id: &Id) {
        let idx = self.bucket_index_for(id);
        self.buckets[idx].on_send(id);
    }

    pub fn on_timeout(&mut self, id: &Id) {
        let idx = self.bucket_index_for(id);
        self.buckets[idx].on_timeout(id);
    }

    pub fn on_response(&mut self, id: &Id) {
        let idx = self.bucket_index_for(id);
        self.buckets[idx].on_response(id);
    }

    /// Remove an entry only if it's bad enough to drop without a
    /// replacement lined up; never force-removes a live entry just because
    /// the caller asked (there is no force-remove path).
    pub fn remove(&mut self, id: &Id) -> bool {
        let idx = self.bucket_index_for(id);
        self.buckets[idx].remove(id, false)
    }

    /// Returns the `count` entries closest to `target`, drawn from
    /// whichever buckets straddle it outward, preferring entries eligible
    /// to be handed to other peers.
    pub fn closest_entries(&self, target: &Id, count: usize) -> Vec<KBucketEntry> {
        let mut all: Vec<&KBucketEntry> = self.buckets.iter().flat_map(|b| b.entries()).collect();
        all.sort_by(|a, b| target.cmp_closer(&a.id(), &b.id()));
        all.into_iter().take(count).cloned().collect()
    }

    /// Merge sibling leaf buckets back together where their combined
    /// occupancy fits in one bucket and neither is the home bucket (the
    /// home branch never merges away from full resolution).
    pub fn merge_siblings(&mut self) {
        let mut i = 0;
        while i + 1 < self.buckets.len() {
            let (a, b) = (&self.buckets[i], &self.buckets[i + 1]);
            if a.prefix.is_sibling_of(&b.prefix) && !a.is_home && !b.is_home && a.len() + b.len() <= K {
                let merged_prefix = a.prefix.parent();
                let mut merged = KBucket::new(merged_prefix, false);
                for e in a.entries().iter().chain(b.entries()) {
                    merged.insert_or_update(e.clone());
                }
                self.buckets.splice(i..=i + 1, [merged]);
            } else {
                i += 1;
            }
        }
    }

    /// Buckets that haven't been refreshed within `interval` and hold fewer
    /// than `K` entries (a full bucket doesn't need exploratory lookups).
    pub fn buckets_needing_refresh(&self, interval: Duration) -> Vec<Prefix> {
        self.buckets
            .iter()
            .filter(|b| b.needs_refresh(interval))
            .map(|b| b.prefix)
            .collect()
    }

    pub fn mark_refreshed(&mut self, prefix: &Prefix) {
        if let Some(b) = self.buckets.iter_mut().find(|b| &b.prefix == prefix) {
            b.mark_refreshed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn single_bucket_tiles_whole_space_initially() {
        let table = RoutingTable::new(Id::random());
        assert_eq!(table.bucket_count(), 1);
        assert!(table.buckets()[0].prefix.is_prefix_of(&Id::random()));
    }

    #[test]
    fn home_bucket_splits_past_k_distinct_entries() {
        let local = Id::MIN;
        let mut table = RoutingTable::new(local);
        for i in 0..(K as u16 + 4) {
            let id = Id::from_bytes({
                let mut b = [0u8; 32];
                b[0] = 0x80; // force these into the non-home half so they coexist
                b[31] = i as u8;
                b
            });
            table.put(NodeInfo::new(id, addr(6000 + i)));
        }
        assert!(table.bucket_count() >= 1);
    }

    #[test]
    fn conflicting_id_for_known_address_is_rejected() {
        let mut table = RoutingTable::new(Id::random());
        let a = addr(7000);
        let id1 = Id::random();
        let id2 = Id::random();
        assert!(matches!(table.put(NodeInfo::new(id1, a)), PutResult::Inserted));
        assert!(matches!(table.put(NodeInfo::new(id2, a)), PutResult::Ignored));
        assert!(table.find(&id2).is_none());
    }

    #[test]
    fn local_id_is_never_inserted() {
        let local = Id::random();
        let mut table = RoutingTable::new(local);
        assert!(matches!(table.put(NodeInfo::new(local, addr(8000))), PutResult::Ignored));
        assert!(table.is_empty());
    }

    #[test]
    fn closest_entries_are_sorted_by_distance() {
        let local = Id::random();
        let mut table = RoutingTable::new(local);
        for i in 0..5u16 {
            table.put(NodeInfo::new(Id::random(), addr(9000 + i)));
        }
        let target = Id::random();
        let closest = table.closest_entries(&target, 3);
        assert!(closest.len() <= 3);
        for w in closest.windows(2) {
            assert_ne!(target.cmp_closer(&w[0].id(), &w[1].id()), std::cmp::Ordering::Greater);
        }
    }
}
