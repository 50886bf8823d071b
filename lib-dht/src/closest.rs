//! Accumulators used while an iterative lookup converges: the full candidate
//! frontier (`ClosestCandidates`) and the best-K nodes that have actually
//! replied (`ClosestSet`).

use crate::id::Id;
use crate::node_info::NodeInfo;

/// Candidate nodes not yet queried (or queried and pending), kept sorted by
/// pinged-count first and then by distance to the lookup target, capped at
/// `3K` so a wide fan-out doesn't grow unbounded.
pub struct ClosestCandidates {
    target: Id,
    capacity: usize,
    entries: Vec<CandidateEntry>,
}

#[derive(Clone)]
struct CandidateEntry {
    info: NodeInfo,
    pinged: u32,
}

impl ClosestCandidates {
    pub fn new(target: Id, capacity: usize) -> Self {
        ClosestCandidates { target, capacity, entries: Vec::new() }
    }

    fn sort(&mut self) {
        let target = self.target;
        self.entries.sort_by(|a, b| {
            a.pinged.cmp(&b.pinged).then_with(|| target.cmp_closer(&a.info.id, &b.info.id))
        });
    }

    pub fn add(&mut self, info: NodeInfo) {
        if self.entries.iter().any(|e| e.info.id == info.id || e.info.socket_address == info.socket_address) {
            return;
        }
        self.entries.push(CandidateEntry { info, pinged: 0 });
        self.sort();
        self.entries.truncate(self.capacity);
    }

    pub fn mark_pinged(&mut self, id: &Id) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.info.id == *id) {
            e.pinged += 1;
        }
        self.sort();
    }

    pub fn remove(&mut self, id: &Id) {
        self.entries.retain(|e| e.info.id != *id);
    }

    /// The next unpinged candidate, if any.
    pub fn next_to_query(&self) -> Option<NodeInfo> {
        self.entries.iter().find(|e| e.pinged == 0).map(|e| e.info)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeInfo> {
        self.entries.iter().map(|e| &e.info)
    }
}

/// The best `K` nodes that have actually answered, used to test lookup
/// termination. `OPTIMISTIC` mode watches the *head* (the single closest
/// responder) for stability; `CONSERVATIVE` mode watches the *tail* (the
/// farthest member still inside the set), which only stops moving once the
/// whole set has settled.
pub struct ClosestSet {
    target: Id,
    capacity: usize,
    entries: Vec<NodeInfo>,
    rounds_since_head_changed: u32,
    rounds_since_tail_changed: u32,
}

impl ClosestSet {
    pub fn new(target: Id, capacity: usize) -> Self {
        ClosestSet {
            target,
            capacity,
            entries: Vec::new(),
            rounds_since_head_changed: 0,
            rounds_since_tail_changed: 0,
        }
    }

    pub fn insert(&mut self, info: NodeInfo) {
        if self.entries.iter().any(|e| e.id == info.id) {
            return;
        }
        let head_before = self.entries.first().map(|e| e.id);
        let tail_before = self.entries.last().map(|e| e.id);
        self.entries.push(info);
        let target = self.target;
        self.entries.sort_by(|a, b| target.cmp_closer(&a.id, &b.id));
        self.entries.truncate(self.capacity);
        if self.entries.first().map(|e| e.id) == head_before {
            self.rounds_since_head_changed += 1;
        } else {
            self.rounds_since_head_changed = 0;
        }
        if self.entries.last().map(|e| e.id) == tail_before {
            self.rounds_since_tail_changed += 1;
        } else {
            self.rounds_since_tail_changed = 0;
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn entries(&self) -> &[NodeInfo] {
        &self.entries
    }

    /// Distance from `target` to the farthest member of the set, or `None`
    /// if the set is empty.
    pub fn tail_distance(&self) -> Option<Id> {
        self.entries.last().map(|e| self.target.distance(&e.id))
    }

    pub fn head_stable_for(&self) -> u32 {
        self.rounds_since_head_changed
    }

    pub fn tail_stable_for(&self) -> u32 {
        self.rounds_since_tail_changed
    }

    /// Whether this set satisfies `mode`'s stability predicate.
    pub fn is_stable(&self, mode: crate::lookup::LookupMode) -> bool {
        use crate::lookup::LookupMode;
        match mode {
            LookupMode::Arbitrary => true,
            LookupMode::Optimistic => self.rounds_since_head_changed as usize > self.capacity,
            LookupMode::Conservative => self.rounds_since_tail_changed as usize > self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn node(id: Id, port: u16) -> NodeInfo {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        NodeInfo::new(id, addr)
    }

    #[test]
    fn candidates_dedupe_by_id_and_address() {
        let target = Id::random();
        let mut c = ClosestCandidates::new(target, 24);
        let id = Id::random();
        c.add(node(id, 1000));
        c.add(node(id, 1000));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn candidates_prefer_unpinged_for_next_query() {
        let target = Id::random();
        let mut c = ClosestCandidates::new(target, 24);
        let a = node(Id::random(), 2000);
        let b = node(Id::random(), 2001);
        c.add(a);
        c.add(b);
        c.mark_pinged(&a.id);
        let next = c.next_to_query().unwrap();
        assert_eq!(next.id, b.id);
    }

    #[test]
    fn closest_set_caps_at_capacity_and_tracks_stability() {
        let target = Id::MIN;
        let mut set = ClosestSet::new(target, 2);
        let mut ids: Vec<Id> = (0..4u8)
            .map(|i| {
                let mut b = [0u8; 32];
                b[0] = i + 1;
                Id::from_bytes(b)
            })
            .collect();
        ids.sort();
        for (i, id) in ids.iter().enumerate() {
            set.insert(node(*id, 3000 + i as u16));
        }
        assert!(set.is_full());
        assert_eq!(set.entries().len(), 2);
        assert_eq!(set.entries()[0].id, ids[0]);
    }
}
