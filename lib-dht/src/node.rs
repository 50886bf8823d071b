//! The composition root: wires the RPC layer, routing table, storage, token
//! manager, and lookup engine into a running DHT node, and drives the
//! maintenance ticker that keeps all of it healthy over time.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{
    BOOTSTRAP_IF_LESS_THAN_X_PEERS, BOOTSTRAP_MIN_INTERVAL, BUCKET_REFRESH_INTERVAL,
    CACHE_PERSISTENCE_INTERVAL, MAINTENANCE_TICK, RANDOM_LOOKUP_INTERVAL, RANDOM_PING_INTERVAL,
    RE_ANNOUNCE_INTERVAL, ROUTING_TABLE_MAINTENANCE_INTERVAL, SELF_LOOKUP_INTERVAL,
    STORAGE_EXPIRE_INTERVAL, TOKEN_TIMEOUT,
};
use crate::error::{NodeError, Result};
use crate::id::Id;
use crate::lookup::{self, LookupMode};
use crate::messages::{Message, Method, RequestBody, ResponseBody};
use crate::node_info::NodeInfo;
use crate::peer_info::PeerInfo;
use crate::routing_table::RoutingTable;
use crate::rpc::transport::UdpDhtTransport;
use crate::rpc::{RequestHandler, RpcServer};
use crate::lookup::task_manager::TaskManager;
use crate::storage::Storage;
use crate::token::TokenManager;
use crate::value::Value;

/// One address family's half of a dual-stack node: its own socket, routing
/// table, and concurrency bounds. Values/peers/the token secret are shared
/// with the sibling family through [`Node`].
struct DhtInstance {
    rpc: Arc<RpcServer<UdpDhtTransport>>,
    routing_table: Arc<AsyncMutex<RoutingTable>>,
    tasks: TaskManager,
    is_ipv6: bool,
}

impl DhtInstance {
    async fn bind(local_id: Id, addr: SocketAddr) -> Result<Self> {
        let transport = UdpDhtTransport::bind(addr)
            .await
            .map_err(|e| NodeError::fatal(format!("binding UDP socket on {addr}: {e}")))?;
        Ok(DhtInstance {
            rpc: Arc::new(RpcServer::new(Arc::new(transport))),
            routing_table: Arc::new(AsyncMutex::new(RoutingTable::new(local_id))),
            tasks: TaskManager::new(),
            is_ipv6: addr.is_ipv6(),
        })
    }

    fn local_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    /// Pulls this instance's address family's contacts out of a response —
    /// `nodes4` for an IPv4 instance, `nodes6` for an IPv6 one.
    fn extract_contacts(&self, r: &ResponseBody) -> Vec<NodeInfo> {
        if self.is_ipv6 {
            r.nodes6.clone()
        } else {
            r.nodes4.clone()
        }
    }
}

/// Handles incoming requests for both address families: look up the
/// matching record in shared storage, consult/refresh the shared routing
/// table for the family the datagram arrived on, and issue a token when
/// asked.
struct Dispatcher {
    local_id: Id,
    storage: Arc<Storage>,
    token_manager: Arc<AsyncMutex<TokenManager>>,
    v4_table: Option<Arc<AsyncMutex<RoutingTable>>>,
    v6_table: Option<Arc<AsyncMutex<RoutingTable>>>,
}

impl Dispatcher {
    async fn table_for(&self, from: SocketAddr) -> Option<Arc<AsyncMutex<RoutingTable>>> {
        match from {
            SocketAddr::V4(_) => self.v4_table.clone(),
            SocketAddr::V6(_) => self.v6_table.clone(),
        }
    }

    async fn closest_nodes_response(&self, target: Id) -> (Vec<NodeInfo>, Vec<NodeInfo>) {
        let n4 = match &self.v4_table {
            Some(table) => table.lock().await.closest_entries(&target, crate::constants::K).into_iter().map(|e| e.info).collect(),
            None => Vec::new(),
        };
        let n6 = match &self.v6_table {
            Some(table) => table.lock().await.closest_entries(&target, crate::constants::K).into_iter().map(|e| e.info).collect(),
            None => Vec::new(),
        };
        (n4, n6)
    }
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn handle_request(&self, from: SocketAddr, message: Message) -> Option<Message> {
        let Message::Request { t, m, a, .. } = message else { return None };

        if let Some(table) = self.table_for(from).await {
            table.lock().await.put(NodeInfo::new(a.sender_id, from));
        }

        let response = match m {
            Method::Ping => ResponseBody { responder_id: self.local_id, ..Default::default() },
            Method::FindNode => self.handle_find_node(from, &a).await,
            Method::FindValue => self.handle_find_value(&a).await,
            Method::StoreValue => match self.handle_store_value(from, &a).await {
                Ok(body) => body,
                Err(e) => return Some(Message::error(t, 400, e.to_string())),
            },
            Method::FindPeer => self.handle_find_peer(from, &a).await,
            Method::AnnouncePeer => match self.handle_announce_peer(from, &a).await {
                Ok(body) => body,
                Err(e) => return Some(Message::error(t, 400, e.to_string())),
            },
        };

        Some(Message::response(t, response))
    }
}

impl Dispatcher {
    async fn handle_find_node(&self, from: SocketAddr, a: &RequestBody) -> ResponseBody {
        let target = a.target.unwrap_or(a.sender_id);
        let (nodes4, nodes6) = self.closest_nodes_response(target).await;
        let token = if a.want_token {
            Some(self.token_manager.lock().await.generate(&from, &a.sender_id))
        } else {
            None
        };
        ResponseBody { responder_id: self.local_id, nodes4, nodes6, token, ..Default::default() }
    }

    async fn handle_find_value(&self, a: &RequestBody) -> ResponseBody {
        let Some(target) = a.value_id else {
            return ResponseBody { responder_id: self.local_id, ..Default::default() };
        };
        match self.storage.get_value(&target) {
            Some(value) if a.expected_sequence.map_or(true, |s| value.sequence_number >= s) => {
                ResponseBody { responder_id: self.local_id, value: Some(value), ..Default::default() }
            }
            _ => {
                let (nodes4, nodes6) = self.closest_nodes_response(target).await;
                ResponseBody { responder_id: self.local_id, nodes4, nodes6, ..Default::default() }
            }
        }
    }

    async fn handle_store_value(&self, from: SocketAddr, a: &RequestBody) -> Result<ResponseBody> {
        let value = a.value.clone().ok_or_else(|| NodeError::protocol("store_value missing value"))?;
        let token = a.token.ok_or_else(|| NodeError::protocol("store_value missing token"))?;
        if !self.token_manager.lock().await.verify(&from, &a.sender_id, &token) {
            return Err(NodeError::protocol("store_value token does not validate"));
        }
        self.storage.put_value(value, a.cas, false)?;
        Ok(ResponseBody { responder_id: self.local_id, ..Default::default() })
    }

    async fn handle_find_peer(&self, from: SocketAddr, a: &RequestBody) -> ResponseBody {
        let Some(target) = a.target else {
            return ResponseBody { responder_id: self.local_id, ..Default::default() };
        };
        let limit = a.max_peers.unwrap_or(8);
        let peers = self.storage.get_peers(&target, limit);
        if peers.is_empty() {
            let (nodes4, nodes6) = self.closest_nodes_response(target).await;
            let token = if a.want_token {
                Some(self.token_manager.lock().await.generate(&from, &a.sender_id))
            } else {
                None
            };
            ResponseBody { responder_id: self.local_id, nodes4, nodes6, token, ..Default::default() }
        } else {
            ResponseBody { responder_id: self.local_id, peers, ..Default::default() }
        }
    }

    async fn handle_announce_peer(&self, from: SocketAddr, a: &RequestBody) -> Result<ResponseBody> {
        let peer = a.peer.clone().ok_or_else(|| NodeError::protocol("announce_peer missing peer"))?;
        let token = a.token.ok_or_else(|| NodeError::protocol("announce_peer missing token"))?;
        if !self.token_manager.lock().await.verify(&from, &a.sender_id, &token) {
            return Err(NodeError::protocol("announce_peer token does not validate"));
        }
        self.storage.put_peer(peer, false)?;
        Ok(ResponseBody { responder_id: self.local_id, ..Default::default() })
    }
}

/// A running Carrier DHT node: up to two address-family instances sharing
/// storage, keypair, and token secret.
pub struct Node {
    local_id: Id,
    public_key: [u8; 32],
    private_key: [u8; 32],
    storage: Arc<Storage>,
    token_manager: Arc<AsyncMutex<TokenManager>>,
    v4: Option<Arc<DhtInstance>>,
    v6: Option<Arc<DhtInstance>>,
    bootstrap: Vec<NodeInfo>,
    maintenance: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let (public_key, private_key) = match config.private_key {
            Some(seed) => {
                let (pk, _) = lib_crypto::classical::ed25519::ed25519_keypair_from_seed(&seed);
                let mut pkb = [0u8; 32];
                pkb.copy_from_slice(&pk);
                (pkb, seed)
            }
            None => {
                let (pk, sk) = lib_crypto::ed25519_keypair();
                let mut pkb = [0u8; 32];
                pkb.copy_from_slice(&pk);
                let mut skb = [0u8; 32];
                skb.copy_from_slice(&sk);
                (pkb, skb)
            }
        };
        let local_id = Id::from_bytes(public_key);

        let storage = Arc::new(Storage::open(&config.data_dir)?);
        let token_manager = Arc::new(AsyncMutex::new(TokenManager::new(TOKEN_TIMEOUT)));

        let v4 = match config.ipv4_socket_addr() {
            Some(addr) => Some(Arc::new(DhtInstance::bind(local_id, addr).await?)),
            None => None,
        };
        let v6 = match config.ipv6_socket_addr() {
            Some(addr) => Some(Arc::new(DhtInstance::bind(local_id, addr).await?)),
            None => None,
        };

        if let Some(bytes) = storage.take_routing_cache_v4() {
            if let Some(instance) = &v4 {
                Self::restore_routing_cache(&instance.routing_table, &bytes).await;
            }
        }
        if let Some(bytes) = storage.take_routing_cache_v6() {
            if let Some(instance) = &v6 {
                Self::restore_routing_cache(&instance.routing_table, &bytes).await;
            }
        }

        let dispatcher = Arc::new(Dispatcher {
            local_id,
            storage: storage.clone(),
            token_manager: token_manager.clone(),
            v4_table: v4.as_ref().map(|i| i.routing_table.clone()),
            v6_table: v6.as_ref().map(|i| i.routing_table.clone()),
        });

        if let Some(instance) = &v4 {
            let rpc = instance.rpc.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = rpc.serve(dispatcher).await {
                    warn!(error = %e, "ipv4 rpc server stopped");
                }
            });
            info!(addr = %instance.local_addr(), "ipv4 dht instance listening");
        }
        if let Some(instance) = &v6 {
            let rpc = instance.rpc.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = rpc.serve(dispatcher).await {
                    warn!(error = %e, "ipv6 rpc server stopped");
                }
            });
            info!(addr = %instance.local_addr(), "ipv6 dht instance listening");
        }

        let bootstrap: Vec<NodeInfo> = config.bootstrap.iter().map(|c| (*c).into()).collect();

        let node = Node {
            local_id,
            public_key,
            private_key,
            storage,
            token_manager,
            v4,
            v6,
            bootstrap,
            maintenance: AsyncMutex::new(None),
        };
        node.spawn_maintenance();
        Ok(node)
    }

    pub fn id(&self) -> Id {
        self.local_id
    }

    /// The node's own signing keypair, `(public_key, private_key)`, for
    /// callers that mint `Value`/`PeerInfo` records owned by this node.
    pub fn keypair(&self) -> ([u8; 32], [u8; 32]) {
        (self.public_key, self.private_key)
    }

    async fn restore_routing_cache(table: &Arc<AsyncMutex<RoutingTable>>, bytes: &[u8]) {
        match bincode::deserialize::<Vec<NodeInfo>>(bytes) {
            Ok(entries) => {
                let mut table = table.lock().await;
                let count = entries.len();
                for entry in entries {
                    table.put(entry);
                }
                info!(count, "restored routing table cache from snapshot");
            }
            Err(e) => warn!(error = %e, "discarding corrupt routing table cache"),
        }
    }

    fn spawn_maintenance(&self) {
        let local_id = self.local_id;
        let storage = self.storage.clone();
        let token_manager = self.token_manager.clone();
        let v4 = self.v4.clone();
        let v6 = self.v6.clone();
        let bootstrap = self.bootstrap.clone();

        let handle = tokio::spawn(async move {
            let mut last_bootstrap = tokio::time::Instant::now() - BOOTSTRAP_MIN_INTERVAL;
            let mut last_self_lookup = tokio::time::Instant::now();
            let mut last_random_lookup = tokio::time::Instant::now();
            let mut last_random_ping = tokio::time::Instant::now();
            let mut last_table_maintenance = tokio::time::Instant::now();
            let mut last_storage_expire = tokio::time::Instant::now();
            let mut last_cache_persist = tokio::time::Instant::now();

            let mut ticker = tokio::time::interval(MAINTENANCE_TICK);
            loop {
                ticker.tick().await;
                let now = tokio::time::Instant::now();

                token_manager.lock().await.maybe_rotate();

                for instance in [&v4, &v6].into_iter().flatten() {
                    let reachable = instance.routing_table.lock().await.len();
                    if reachable < BOOTSTRAP_IF_LESS_THAN_X_PEERS
                        && now.duration_since(last_bootstrap) >= BOOTSTRAP_MIN_INTERVAL
                        && !bootstrap.is_empty()
                    {
                        debug!(reachable, "bootstrapping: below minimum reachable peer count");
                        let _permit = instance.tasks.acquire().await;
                        let _ = lookup::lookup_nodes(
                            instance.rpc.clone(),
                            instance.routing_table.clone(),
                            local_id,
                            local_id,
                            LookupMode::Conservative,
                            &bootstrap,
                            false,
                            |r: &ResponseBody| instance.extract_contacts(r),
                        )
                        .await;
                        last_bootstrap = now;
                    }
                }

                if now.duration_since(last_table_maintenance) >= ROUTING_TABLE_MAINTENANCE_INTERVAL {
                    for instance in [&v4, &v6].into_iter().flatten() {
                        let stale = instance.routing_table.lock().await.buckets_needing_refresh(BUCKET_REFRESH_INTERVAL);
                        for prefix in stale {
                            let random_in_prefix = prefix.random_id_in_prefix();
                            let _permit = instance.tasks.acquire().await;
                            let _ = lookup::lookup_nodes(
                                instance.rpc.clone(),
                                instance.routing_table.clone(),
                                local_id,
                                random_in_prefix,
                                LookupMode::Optimistic,
                                &bootstrap,
                                false,
                                |r: &ResponseBody| instance.extract_contacts(r),
                            )
                            .await;
                            instance.routing_table.lock().await.mark_refreshed(&prefix);
                        }
                        instance.routing_table.lock().await.merge_siblings();
                    }
                    last_table_maintenance = now;
                }

                if now.duration_since(last_self_lookup) >= SELF_LOOKUP_INTERVAL {
                    for instance in [&v4, &v6].into_iter().flatten() {
                        let _permit = instance.tasks.acquire().await;
                        let _ = lookup::lookup_nodes(
                            instance.rpc.clone(),
                            instance.routing_table.clone(),
                            local_id,
                            local_id,
                            LookupMode::Conservative,
                            &bootstrap,
                            false,
                            |r: &ResponseBody| instance.extract_contacts(r),
                        )
                        .await;
                    }
                    last_self_lookup = now;
                }

                if now.duration_since(last_random_lookup) >= RANDOM_LOOKUP_INTERVAL {
                    for instance in [&v4, &v6].into_iter().flatten() {
                        let _permit = instance.tasks.acquire().await;
                        let _ = lookup::lookup_nodes(
                            instance.rpc.clone(),
                            instance.routing_table.clone(),
                            local_id,
                            Id::random(),
                            LookupMode::Optimistic,
                            &bootstrap,
                            false,
                            |r: &ResponseBody| instance.extract_contacts(r),
                        )
                        .await;
                    }
                    last_random_lookup = now;
                }

                if now.duration_since(last_random_ping) >= RANDOM_PING_INTERVAL {
                    for instance in [&v4, &v6].into_iter().flatten() {
                        instance.rpc.sweep_stalled().await;

                        let candidate = {
                            let table = instance.routing_table.lock().await;
                            let entries: Vec<NodeInfo> =
                                table.buckets().iter().flat_map(|b| b.entries().iter().map(|e| e.info)).collect();
                            if entries.is_empty() {
                                None
                            } else {
                                let idx = rand::rngs::OsRng.gen_range(0..entries.len());
                                Some(entries[idx])
                            }
                        };

                        if let Some(contact) = candidate {
                            instance.routing_table.lock().await.on_send(&contact.id);
                            let result =
                                instance.rpc.call(contact.socket_address, move |t| Message::ping(t, local_id)).await;
                            match result {
                                Ok(_) => instance.routing_table.lock().await.on_response(&contact.id),
                                Err(_) => instance.routing_table.lock().await.on_timeout(&contact.id),
                            }
                        }
                    }
                    last_random_ping = now;
                }

                if now.duration_since(last_storage_expire) >= STORAGE_EXPIRE_INTERVAL {
                    storage.expire();
                    let cutoff = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs()
                        .saturating_sub(RE_ANNOUNCE_INTERVAL.as_secs());

                    if let Some(instance) = v4.as_ref().or(v6.as_ref()) {
                        for value in storage.get_persistent_values(cutoff) {
                            let id = value.id();
                            let _permit = instance.tasks.acquire().await;
                            let lookup_outcome = lookup::lookup_nodes(
                                instance.rpc.clone(),
                                instance.routing_table.clone(),
                                local_id,
                                id,
                                LookupMode::Conservative,
                                &bootstrap,
                                true,
                                |r: &ResponseBody| instance.extract_contacts(r),
                            )
                            .await;
                            lookup::store_value(instance.rpc.clone(), local_id, value, None, lookup_outcome.tokens)
                                .await;
                            storage.update_value_last_announce(&id);
                        }

                        for peer in storage.get_persistent_peers(cutoff) {
                            let target = peer.peer_id;
                            let origin = peer.origin_id;
                            let _permit = instance.tasks.acquire().await;
                            let lookup_outcome = lookup::lookup_nodes(
                                instance.rpc.clone(),
                                instance.routing_table.clone(),
                                local_id,
                                target,
                                LookupMode::Conservative,
                                &bootstrap,
                                true,
                                |r: &ResponseBody| instance.extract_contacts(r),
                            )
                            .await;
                            lookup::announce_peer(instance.rpc.clone(), local_id, peer, lookup_outcome.tokens).await;
                            storage.update_peer_last_announce(&target, &origin);
                        }
                    }

                    last_storage_expire = now;
                }

                if now.duration_since(last_cache_persist) >= CACHE_PERSISTENCE_INTERVAL {
                    if let Some(instance) = &v4 {
                        let entries: Vec<NodeInfo> =
                            instance.routing_table.lock().await.buckets().iter().flat_map(|b| b.entries().iter().map(|e| e.info)).collect();
                        if let Ok(bytes) = bincode::serialize(&entries) {
                            storage.put_routing_cache_v4(bytes);
                        }
                    }
                    if let Some(instance) = &v6 {
                        let entries: Vec<NodeInfo> =
                            instance.routing_table.lock().await.buckets().iter().flat_map(|b| b.entries().iter().map(|e| e.info)).collect();
                        if let Ok(bytes) = bincode::serialize(&entries) {
                            storage.put_routing_cache_v6(bytes);
                        }
                    }
                    if let Err(e) = storage.clone().persist().await {
                        warn!(error = %e, "failed to persist storage snapshot");
                    }
                    last_cache_persist = now;
                }
            }
        });

        // `maintenance` is set synchronously from an async fn, so block on
        // the uncontended lock rather than spawning yet another task for it.
        if let Ok(mut guard) = self.maintenance.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Stop the maintenance loop and RPC servers. Dropping the `Node` also
    /// cancels everything, but this lets a caller await a clean shutdown.
    pub async fn stop(&self) {
        if let Some(handle) = self.maintenance.lock().await.take() {
            handle.abort();
        }
        if let Err(e) = self.storage.clone().persist().await {
            warn!(error = %e, "failed to persist storage snapshot on shutdown");
        }
    }

    fn preferred_instance(&self) -> Result<&Arc<DhtInstance>> {
        self.v4.as_ref().or(self.v6.as_ref()).ok_or_else(|| NodeError::state("no address family enabled"))
    }

    pub async fn find_node(&self, target: Id, mode: Option<LookupMode>) -> Result<Vec<NodeInfo>> {
        let instance = self.preferred_instance()?;
        let _permit = instance.tasks.acquire().await;
        let outcome = lookup::lookup_nodes(
            instance.rpc.clone(),
            instance.routing_table.clone(),
            self.local_id,
            target,
            mode.unwrap_or_default(),
            &self.bootstrap,
            false,
            |r: &ResponseBody| instance.extract_contacts(r),
        )
        .await;
        Ok(outcome.closest.entries().to_vec())
    }

    pub async fn find_value(
        &self,
        target: Id,
        mode: Option<LookupMode>,
        expected_sequence: Option<i64>,
    ) -> Result<Option<Value>> {
        if let Some(local) = self.storage.get_value(&target) {
            if expected_sequence.map_or(true, |s| local.sequence_number >= s) {
                return Ok(Some(local));
            }
        }
        let instance = self.preferred_instance()?;
        let _permit = instance.tasks.acquire().await;
        let outcome = lookup::lookup_value(
            instance.rpc.clone(),
            instance.routing_table.clone(),
            self.local_id,
            target,
            mode.unwrap_or_default(),
            &self.bootstrap,
            expected_sequence,
            |r: &ResponseBody| instance.extract_contacts(r),
        )
        .await;
        Ok(outcome.found)
    }

    pub async fn store_value(&self, value: Value, persistent: bool) -> Result<()> {
        let id = value.id();
        self.storage.put_value(value.clone(), None, persistent)?;

        let instance = self.preferred_instance()?;
        let _permit = instance.tasks.acquire().await;
        let lookup_outcome = lookup::lookup_nodes(
            instance.rpc.clone(),
            instance.routing_table.clone(),
            self.local_id,
            id,
            LookupMode::Conservative,
            &self.bootstrap,
            true,
            |r: &ResponseBody| instance.extract_contacts(r),
        )
        .await;

        lookup::store_value(instance.rpc.clone(), self.local_id, value, None, lookup_outcome.tokens).await;
        self.storage.update_value_last_announce(&id);
        Ok(())
    }

    pub async fn find_peer(&self, target: Id, count: usize, mode: Option<LookupMode>) -> Result<Vec<PeerInfo>> {
        let mut found = self.storage.get_peers(&target, count);
        if found.len() >= count {
            found.truncate(count);
            return Ok(found);
        }
        let instance = self.preferred_instance()?;
        let _permit = instance.tasks.acquire().await;
        let outcome = lookup::lookup_peers(
            instance.rpc.clone(),
            instance.routing_table.clone(),
            self.local_id,
            target,
            mode.unwrap_or_default(),
            &self.bootstrap,
            count,
            false,
            |r: &ResponseBody| instance.extract_contacts(r),
        )
        .await;
        let mut remote = outcome.found.unwrap_or_default();
        found.append(&mut remote);
        found.dedup_by_key(|p| p.peer_id);
        found.truncate(count);
        Ok(found)
    }

    pub async fn announce_peer(&self, peer: PeerInfo, persistent: bool) -> Result<()> {
        if !peer.is_valid() {
            return Err(NodeError::invalid_argument("peer info does not validate"));
        }
        self.storage.put_peer(peer.clone(), persistent)?;

        let instance = self.preferred_instance()?;
        let _permit = instance.tasks.acquire().await;
        let lookup_outcome = lookup::lookup_nodes(
            instance.rpc.clone(),
            instance.routing_table.clone(),
            self.local_id,
            peer.peer_id,
            LookupMode::Conservative,
            &self.bootstrap,
            true,
            |r: &ResponseBody| instance.extract_contacts(r),
        )
        .await;

        lookup::announce_peer(instance.rpc.clone(), self.local_id, peer.clone(), lookup_outcome.tokens).await;
        self.storage.update_peer_last_announce(&peer.peer_id, &peer.origin_id);
        Ok(())
    }

    pub async fn ping(&self, target: NodeInfo) -> Result<()> {
        let instance = self.preferred_instance()?;
        let local_id = self.local_id;
        instance
            .rpc
            .call(target.socket_address, move |t| Message::ping(t, local_id))
            .await
            .map_err(|_| NodeError::Timeout)?;
        Ok(())
    }

    pub fn get_value(&self, id: &Id) -> Option<Value> {
        self.storage.get_value(id)
    }

    pub fn get_peers(&self, peer_id: &Id, limit: usize) -> Vec<PeerInfo> {
        self.storage.get_peers(peer_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapContact;

    fn id_for_seed(seed: [u8; 32]) -> Id {
        let (pk, _) = lib_crypto::classical::ed25519::ed25519_keypair_from_seed(&seed);
        let mut pkb = [0u8; 32];
        pkb.copy_from_slice(&pk);
        Id::from_bytes(pkb)
    }

    async fn start_node(seed: [u8; 32], port: u16, peer: Option<(Id, u16)>) -> (Node, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.port = port;
        config.private_key = Some(seed);
        if let Some((id, peer_port)) = peer {
            config = config.with_bootstrap(vec![BootstrapContact {
                id,
                address: format!("127.0.0.1:{peer_port}").parse().unwrap(),
            }]);
        }
        (Node::start(config).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn two_nodes_discover_each_other_via_bootstrap() {
        let seed_a = [11u8; 32];
        let seed_b = [22u8; 32];
        let id_a = id_for_seed(seed_a);
        let id_b = id_for_seed(seed_b);

        let (node_a, _dir_a) = start_node(seed_a, 45301, None).await;
        let (node_b, _dir_b) = start_node(seed_b, 45302, Some((id_a, 45301))).await;

        let found = node_b.find_node(id_a, Some(LookupMode::Conservative)).await.unwrap();
        assert!(found.iter().any(|n| n.id == id_a));

        node_a.stop().await;
        node_b.stop().await;
        let _ = id_b;
    }

    #[tokio::test]
    async fn immutable_value_replicates_between_bootstrapped_nodes() {
        let seed_a = [33u8; 32];
        let seed_b = [44u8; 32];
        let id_a = id_for_seed(seed_a);
        let id_b = id_for_seed(seed_b);

        let (node_a, _dir_a) = start_node(seed_a, 45311, Some((id_b, 45312))).await;
        let (node_b, _dir_b) = start_node(seed_b, 45312, Some((id_a, 45311))).await;

        let value = Value::new_immutable(b"hello carrier".to_vec()).unwrap();
        let value_id = value.id();
        node_a.store_value(value.clone(), false).await.unwrap();

        let fetched = node_b.find_value(value_id, Some(LookupMode::Conservative), None).await.unwrap();
        assert_eq!(fetched, Some(value));

        node_a.stop().await;
        node_b.stop().await;
    }
}
