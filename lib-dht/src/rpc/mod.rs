//! RPC layer: sends requests over the transport, matches replies back to
//! their caller by transaction id, and hands incoming requests to a
//! dispatcher.

pub mod call;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::constants::{MAX_ACTIVE_CALLS, RPC_CALL_TIMEOUT_BASELINE_MIN};
use crate::messages::Message;
use call::CallRegistry;
use transport::DhtTransport;

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_request(&self, from: SocketAddr, message: Message) -> Option<Message>;
}

pub struct RpcServer<T: DhtTransport> {
    transport: Arc<T>,
    registry: Mutex<CallRegistry>,
}

impl<T: DhtTransport + 'static> RpcServer<T> {
    pub fn new(transport: Arc<T>) -> Self {
        RpcServer { transport, registry: Mutex::new(CallRegistry::new(MAX_ACTIVE_CALLS)) }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Send a request and await its matched response, bounded by an
    /// adaptive per-peer timeout.
    pub async fn call(&self, target: SocketAddr, build_request: impl FnOnce(u32) -> Message + Send) -> Result<Message> {
        let (transaction_id, rx, timeout, request) = {
            let mut registry = self.registry.lock().await;
            let timeout = registry.timeout_for(&target);
            let (transaction_id, rx) = registry
                .open(target, build_request)
                .ok_or_else(|| anyhow!("too many active RPC calls"))?;
            let request = registry.request_bytes(transaction_id)?;
            (transaction_id, rx, timeout, request)
        };

        self.transport.send(&request, target).await?;
        self.registry.lock().await.mark_sent(transaction_id);
        trace!(%target, transaction_id, "rpc call sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.registry.lock().await.timeout(transaction_id);
                Err(anyhow!("rpc call cancelled"))
            }
            Err(_) => {
                self.registry.lock().await.timeout(transaction_id);
                warn!(%target, transaction_id, "rpc call timed out");
                Err(anyhow!("rpc call to {target} timed out"))
            }
        }
    }

    pub async fn send_raw(&self, target: SocketAddr, message: &Message) -> Result<()> {
        let bytes = message.to_bytes()?;
        self.transport.send(&bytes, target).await
    }

    /// Drive the receive loop: decode datagrams, route responses back to
    /// their waiting caller, and hand requests to `handler`.
    pub async fn serve(&self, handler: Arc<dyn RequestHandler>) -> Result<()> {
        loop {
            let (bytes, from) = self.transport.receive().await?;
            let message = match Message::from_bytes(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    debug!(%from, error = %e, "dropping undecodable datagram");
                    continue;
                }
            };

            match message {
                Message::Request { .. } => {
                    if let Some(reply) = handler.handle_request(from, message).await {
                        if let Err(e) = self.send_raw(from, &reply).await {
                            warn!(%from, error = %e, "failed to send rpc reply");
                        }
                    }
                }
                Message::Response { t, .. } | Message::Error { t, .. } => {
                    let transaction_id = t;
                    let completed = self.registry.lock().await.complete(transaction_id, message);
                    if !completed {
                        debug!(%from, transaction_id, "reply to unknown or expired call");
                    }
                }
            }
        }
    }

    pub async fn sweep_stalled(&self) {
        self.registry.lock().await.sweep_stalled(RPC_CALL_TIMEOUT_BASELINE_MIN);
    }
}
