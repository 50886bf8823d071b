//! UDP transport: the DHT only ever talks over bare UDP datagrams
//! addressed by `SocketAddr`, so the transport here is a thin wrapper
//! rather than a pluggable multi-protocol abstraction.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::UdpSocket;

pub const MAX_DATAGRAM: usize = 65536;

#[async_trait]
pub trait DhtTransport: Send + Sync {
    async fn send(&self, data: &[u8], peer: SocketAddr) -> Result<()>;
    async fn receive(&self) -> Result<(Vec<u8>, SocketAddr)>;
    fn local_addr(&self) -> SocketAddr;
}

pub struct UdpDhtTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpDhtTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(UdpDhtTransport { socket: Arc::new(socket), local_addr })
    }
}

#[async_trait]
impl DhtTransport for UdpDhtTransport {
    async fn send(&self, data: &[u8], peer: SocketAddr) -> Result<()> {
        self.socket.send_to(data, peer).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
