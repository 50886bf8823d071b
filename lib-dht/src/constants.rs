//! Tunable constants governing routing, RPC, lookup, and maintenance behavior.

use std::time::Duration;

/// Kademlia bucket size.
pub const K: usize = 8;

/// Maximum bucket index / id bit-length.
pub const ID_BITS: usize = 256;

pub const RPC_CALL_TIMEOUT_BASELINE_MIN: Duration = Duration::from_millis(100);
pub const RPC_CALL_TIMEOUT_MAX: Duration = Duration::from_millis(10_000);
pub const MAX_ACTIVE_CALLS: usize = 256;
pub const RPC_SERVER_REACHABILITY_TIMEOUT: Duration = Duration::from_secs(60);

pub const ROUTING_TABLE_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(4 * 60);
pub const BUCKET_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const BOOTSTRAP_IF_LESS_THAN_X_PEERS: usize = 30;
pub const BOOTSTRAP_MIN_INTERVAL: Duration = Duration::from_secs(4 * 60);

pub const MAX_CONCURRENT_TASK_REQUESTS: usize = 10;
pub const MAX_ACTIVE_TASKS: usize = 16;

pub const MAX_VALUE_AGE: Duration = Duration::from_secs(2 * 60 * 60);
pub const MAX_PEER_AGE: Duration = Duration::from_secs(2 * 60 * 60);
pub const RE_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const STORAGE_EXPIRE_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const TOKEN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// An entry with more than this many consecutive failed requests, and not
/// seen since our last request to it, is removable without replacement.
pub const KBUCKET_MAX_TIMEOUTS: i32 = 5;
/// Threshold beyond which a stale, failing entry is considered old-and-stale.
pub const KBUCKET_OLD_AND_STALE_TIMEOUTS: i32 = 2;
pub const KBUCKET_OLD_AND_STALE_TIME: Duration = Duration::from_secs(15 * 60);
/// An entry seen within this window is never re-pinged, to let NAT mappings
/// time out on their own (see arXiv:1605.05606).
pub const KBUCKET_RECENTLY_SEEN_WINDOW: Duration = Duration::from_secs(30);

pub const MAINTENANCE_TICK: Duration = Duration::from_secs(1);
pub const TOKEN_ROTATION_TICK: Duration = TOKEN_TIMEOUT;
pub const SELF_LOOKUP_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const RANDOM_LOOKUP_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const RANDOM_PING_INTERVAL: Duration = Duration::from_secs(10);
pub const CACHE_PERSISTENCE_INTERVAL: Duration = Duration::from_secs(10 * 60);
