//! Iterative lookups: the core node lookup that all of `find_node`,
//! `find_value`, `find_peer`, `store_value`, and `announce_peer` build on.

pub mod announce;
pub mod node_lookup;
pub mod peer_lookup;
pub mod task_manager;
pub mod value_lookup;

/// Controls how aggressively a lookup keeps querying once it has something
/// it could already return.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum LookupMode {
    /// Return after the first plausible answer (a validating value/peer, or
    /// the first `K` node responders) without waiting for the closest set
    /// to settle.
    Arbitrary,
    /// Return once the closest-set head stops moving
    /// (`rounds_since_head_changed > K`): a few more distant contacts may
    /// still be churning, but the nearest candidates have settled.
    #[default]
    Optimistic,
    /// Return only once the closest-set tail stops moving, i.e. the full
    /// set is stable: the most thorough mode, used when the caller wants a
    /// dependable `K`-closest answer.
    Conservative,
}

pub use announce::{announce_peer, store_value};
pub use node_lookup::lookup_nodes;
pub use peer_lookup::lookup_peers;
pub use value_lookup::lookup_value;
