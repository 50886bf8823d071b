//! Local storage: in-memory tables for values and peers are the source of
//! truth during a run; a versioned snapshot is written to disk so a restart
//! can warm-start instead of bootstrapping from nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{MAX_PEER_AGE, MAX_VALUE_AGE};
use crate::error::{NodeError, Result};
use crate::id::Id;
use crate::peer_info::PeerInfo;
use crate::value::Value;

const SNAPSHOT_FORMAT_VERSION: u32 = 1;
const SNAPSHOT_FILE_NAME: &str = "dht-storage.snapshot";

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[derive(Clone, Serialize, Deserialize)]
struct ValueRecord {
    value: Value,
    last_announce: u64,
    persistent: bool,
}

#[derive(Clone, Serialize, Deserialize)]
struct PeerRecord {
    peer: PeerInfo,
    last_announce: u64,
    persistent: bool,
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    values: Vec<(Id, ValueRecord)>,
    peers: Vec<((Id, Id), PeerRecord)>,
    routing_cache_v4: Option<Vec<u8>>,
    routing_cache_v6: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    snapshot: Snapshot,
}

struct Tables {
    values: HashMap<Id, ValueRecord>,
    peers: HashMap<(Id, Id), PeerRecord>,
    routing_cache_v4: Option<Vec<u8>>,
    routing_cache_v6: Option<Vec<u8>>,
}

/// Persistent store for DHT values, peer announcements, and a routing-table
/// warm-restart cache. Shared across both address-family DHT instances.
pub struct Storage {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl Storage {
    /// Load an existing snapshot from `data_dir` if present, otherwise start
    /// empty. `data_dir` is created if it doesn't exist.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| NodeError::io(format!("creating data directory: {e}")))?;
        let snapshot_path = data_dir.join(SNAPSHOT_FILE_NAME);

        let snapshot = if snapshot_path.exists() {
            let bytes = std::fs::read(&snapshot_path)
                .map_err(|e| NodeError::io(format!("reading storage snapshot: {e}")))?;
            match bincode::deserialize::<SnapshotEnvelope>(&bytes) {
                Ok(envelope) if envelope.version == SNAPSHOT_FORMAT_VERSION => envelope.snapshot,
                Ok(envelope) => {
                    warn!(found = envelope.version, expected = SNAPSHOT_FORMAT_VERSION, "storage snapshot format mismatch, starting empty");
                    Snapshot::default()
                }
                Err(e) => {
                    warn!(error = %e, "storage snapshot is corrupt, starting empty");
                    Snapshot::default()
                }
            }
        } else {
            Snapshot::default()
        };

        Ok(Storage {
            path: data_dir,
            tables: Mutex::new(Tables {
                values: snapshot.values.into_iter().collect(),
                peers: snapshot.peers.into_iter().collect(),
                routing_cache_v4: snapshot.routing_cache_v4,
                routing_cache_v6: snapshot.routing_cache_v6,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rejects an invalid value outright; for an update to an existing
    /// signed value, rejects unless the new sequence number is strictly
    /// greater and, when `expected_sequence` is given, matches the stored
    /// sequence exactly (compare-and-swap).
    pub fn put_value(&self, value: Value, expected_sequence: Option<i64>, persistent: bool) -> Result<()> {
        if !value.is_valid() {
            return Err(NodeError::invalid_argument("value does not validate"));
        }
        let id = value.id();
        let mut tables = self.lock();
        if let Some(existing) = tables.values.get(&id) {
            if value.is_mutable() {
                if value.sequence_number <= existing.value.sequence_number {
                    return Err(NodeError::state("sequence number must increase on update"));
                }
                if let Some(expected) = expected_sequence {
                    if expected != existing.value.sequence_number {
                        return Err(NodeError::state("compare-and-swap sequence mismatch"));
                    }
                }
            }
        }
        tables.values.insert(id, ValueRecord { value, last_announce: now_secs(), persistent });
        Ok(())
    }

    pub fn get_value(&self, id: &Id) -> Option<Value> {
        self.lock().values.get(id).map(|r| r.value.clone())
    }

    pub fn remove_value(&self, id: &Id) {
        self.lock().values.remove(id);
    }

    pub fn update_value_last_announce(&self, id: &Id) {
        if let Some(record) = self.lock().values.get_mut(id) {
            record.last_announce = now_secs();
        }
    }

    pub fn get_persistent_values(&self, before_timestamp: u64) -> Vec<Value> {
        self.lock()
            .values
            .values()
            .filter(|r| r.persistent && r.last_announce < before_timestamp)
            .map(|r| r.value.clone())
            .collect()
    }

    pub fn put_peer(&self, peer: PeerInfo, persistent: bool) -> Result<()> {
        if !peer.is_valid() {
            return Err(NodeError::invalid_argument("peer info does not validate"));
        }
        let key = (peer.peer_id, peer.origin_id);
        self.lock().peers.insert(key, PeerRecord { peer, last_announce: now_secs(), persistent });
        Ok(())
    }

    pub fn get_peer(&self, peer_id: &Id, origin_id: &Id) -> Option<PeerInfo> {
        self.lock().peers.get(&(*peer_id, *origin_id)).map(|r| r.peer.clone())
    }

    pub fn get_peers(&self, peer_id: &Id, limit: usize) -> Vec<PeerInfo> {
        self.lock()
            .peers
            .values()
            .filter(|r| r.peer.peer_id == *peer_id)
            .take(limit)
            .map(|r| r.peer.clone())
            .collect()
    }

    pub fn remove_peer(&self, peer_id: &Id, origin_id: &Id) {
        self.lock().peers.remove(&(*peer_id, *origin_id));
    }

    pub fn update_peer_last_announce(&self, peer_id: &Id, origin_id: &Id) {
        if let Some(record) = self.lock().peers.get_mut(&(*peer_id, *origin_id)) {
            record.last_announce = now_secs();
        }
    }

    pub fn get_persistent_peers(&self, before_timestamp: u64) -> Vec<PeerInfo> {
        self.lock()
            .peers
            .values()
            .filter(|r| r.persistent && r.last_announce < before_timestamp)
            .map(|r| r.peer.clone())
            .collect()
    }

    /// Purge non-persistent entries older than `MAX_VALUE_AGE`/`MAX_PEER_AGE`.
    /// Run by the maintenance ticker every `STORAGE_EXPIRE_INTERVAL`.
    pub fn expire(&self) {
        let now = now_secs();
        let value_cutoff = now.saturating_sub(MAX_VALUE_AGE.as_secs());
        let peer_cutoff = now.saturating_sub(MAX_PEER_AGE.as_secs());
        let mut tables = self.lock();
        let before = tables.values.len();
        tables.values.retain(|_, r| r.persistent || r.last_announce >= value_cutoff);
        let values_expired = before - tables.values.len();
        let before = tables.peers.len();
        tables.peers.retain(|_, r| r.persistent || r.last_announce >= peer_cutoff);
        let peers_expired = before - tables.peers.len();
        if values_expired > 0 || peers_expired > 0 {
            debug!(values_expired, peers_expired, "storage expiry swept aged entries");
        }
    }

    pub fn put_routing_cache_v4(&self, bytes: Vec<u8>) {
        self.lock().routing_cache_v4 = Some(bytes);
    }

    pub fn put_routing_cache_v6(&self, bytes: Vec<u8>) {
        self.lock().routing_cache_v6 = Some(bytes);
    }

    pub fn take_routing_cache_v4(&self) -> Option<Vec<u8>> {
        self.lock().routing_cache_v4.clone()
    }

    pub fn take_routing_cache_v6(&self) -> Option<Vec<u8>> {
        self.lock().routing_cache_v6.clone()
    }

    fn build_snapshot(&self) -> Snapshot {
        let tables = self.lock();
        Snapshot {
            values: tables.values.iter().map(|(k, v)| (*k, v.clone())).collect(),
            peers: tables.peers.iter().map(|(k, v)| (*k, v.clone())).collect(),
            routing_cache_v4: tables.routing_cache_v4.clone(),
            routing_cache_v6: tables.routing_cache_v6.clone(),
        }
    }

    /// Serialize the current tables and atomically replace the on-disk
    /// snapshot: write to a temp file, flush, then rename over the target so
    /// a crash mid-write never corrupts the previous snapshot. Runs on the
    /// blocking thread pool since it does synchronous file I/O.
    pub async fn persist(self: std::sync::Arc<Self>) -> Result<()> {
        let snapshot = self.build_snapshot();
        let envelope = SnapshotEnvelope { version: SNAPSHOT_FORMAT_VERSION, snapshot };
        let path = self.path.join(SNAPSHOT_FILE_NAME);
        let tmp_path = self.path.join(format!("{SNAPSHOT_FILE_NAME}.tmp"));

        tokio::task::spawn_blocking(move || -> Result<()> {
            let bytes = bincode::serialize(&envelope)
                .map_err(|e| NodeError::state(format!("encoding storage snapshot: {e}")))?;
            std::fs::write(&tmp_path, &bytes)
                .map_err(|e| NodeError::io(format!("writing storage snapshot: {e}")))?;
            std::fs::rename(&tmp_path, &path)
                .map_err(|e| NodeError::io(format!("installing storage snapshot: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| NodeError::fatal(format!("snapshot task panicked: {e}")))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn put_and_get_immutable_value() {
        let dir = temp_dir();
        let storage = Storage::open(dir.path()).unwrap();
        let value = Value::new_immutable(b"hello".to_vec()).unwrap();
        let id = value.id();
        storage.put_value(value.clone(), None, false).unwrap();
        assert_eq!(storage.get_value(&id), Some(value));
    }

    #[test]
    fn put_value_rejects_non_increasing_sequence() {
        use lib_crypto::classical::ed25519_keypair;
        let dir = temp_dir();
        let storage = Storage::open(dir.path()).unwrap();
        let (pk_v, sk_v) = ed25519_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&pk_v);
        let mut sk = [0u8; 32];
        sk.copy_from_slice(&sk_v);
        let nonce = [4u8; crate::value::NONCE_BYTES];
        let v0 = Value::new_signed(pk, sk, nonce, 0, b"a".to_vec()).unwrap();
        storage.put_value(v0.clone(), None, false).unwrap();
        let stale = Value::new_signed(pk, sk, nonce, 0, b"b".to_vec()).unwrap();
        assert!(storage.put_value(stale, None, false).is_err());
        let v1 = Value::new_signed(pk, sk, nonce, 1, b"b".to_vec()).unwrap();
        assert!(storage.put_value(v1, None, false).is_ok());
    }

    #[test]
    fn cas_rejects_mismatched_expected_sequence() {
        use lib_crypto::classical::ed25519_keypair;
        let dir = temp_dir();
        let storage = Storage::open(dir.path()).unwrap();
        let (pk_v, sk_v) = ed25519_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&pk_v);
        let mut sk = [0u8; 32];
        sk.copy_from_slice(&sk_v);
        let nonce = [2u8; crate::value::NONCE_BYTES];
        let v0 = Value::new_signed(pk, sk, nonce, 5, b"a".to_vec()).unwrap();
        storage.put_value(v0, None, false).unwrap();
        let v1 = Value::new_signed(pk, sk, nonce, 6, b"b".to_vec()).unwrap();
        assert!(storage.put_value(v1, Some(3), false).is_err());
    }

    #[test]
    fn peers_are_keyed_by_peer_and_origin() {
        let dir = temp_dir();
        let storage = Storage::open(dir.path()).unwrap();
        let mut seed = [0u8; 32];
        seed[0] = 1;
        let node_id = Id::random();
        let peer = PeerInfo::create(seed, node_id, node_id, 8080, None).unwrap();
        storage.put_peer(peer.clone(), false).unwrap();
        assert_eq!(storage.get_peer(&peer.peer_id, &peer.origin_id), Some(peer.clone()));
        assert_eq!(storage.get_peers(&peer.peer_id, 10), vec![peer]);
    }

    #[tokio::test]
    async fn snapshot_round_trips_across_reopen() {
        let dir = temp_dir();
        let storage = std::sync::Arc::new(Storage::open(dir.path()).unwrap());
        let value = Value::new_immutable(b"durable".to_vec()).unwrap();
        let id = value.id();
        storage.put_value(value, None, true).unwrap();
        storage.clone().persist().await.unwrap();

        let reopened = Storage::open(dir.path()).unwrap();
        assert!(reopened.get_value(&id).is_some());
    }
}
