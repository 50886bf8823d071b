//! Node configuration: constructed programmatically, or for a standalone
//! binary, loaded from a small TOML file. Validated synchronously at
//! construction so a bad config surfaces as an argument error, never a
//! panic mid-startup.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NodeError, Result};
use crate::id::Id;
use crate::node_info::NodeInfo;

/// An `(id, address)` pair this node should try contacting at startup when
/// its routing table is empty or too small.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BootstrapContact {
    pub id: Id,
    pub address: std::net::SocketAddr,
}

impl From<BootstrapContact> for NodeInfo {
    fn from(contact: BootstrapContact) -> Self {
        NodeInfo::new(contact.id, contact.address)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// `Some` enables the IPv4 DHT instance, bound to this address.
    pub ipv4_address: Option<Ipv4Addr>,
    /// `Some` enables the IPv6 DHT instance, bound to this address.
    pub ipv6_address: Option<Ipv6Addr>,
    pub port: u16,
    pub data_dir: PathBuf,
    pub bootstrap: Vec<BootstrapContact>,
    /// Ed25519 signing seed. Generated on first run and persisted under
    /// `data_dir` if not supplied.
    pub private_key: Option<[u8; 32]>,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            ipv4_address: Some(Ipv4Addr::UNSPECIFIED),
            ipv6_address: None,
            port: 39001,
            data_dir: data_dir.into(),
            bootstrap: Vec::new(),
            private_key: None,
        }
    }

    pub fn with_ipv6(mut self, addr: Ipv6Addr) -> Self {
        self.ipv6_address = Some(addr);
        self
    }

    pub fn with_bootstrap(mut self, contacts: Vec<BootstrapContact>) -> Self {
        self.bootstrap = contacts;
        self
    }

    /// Parse a TOML config file, falling back to each field's environment
    /// override (`CARRIER_DHT_PORT`, `CARRIER_DHT_DATA_DIR`) where set.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NodeError::io(format!("reading config file: {e}")))?;
        let mut config: Config =
            toml::from_str(&text).map_err(|e| NodeError::invalid_argument(format!("parsing config: {e}")))?;

        if let Ok(port) = std::env::var("CARRIER_DHT_PORT") {
            config.port = port
                .parse()
                .map_err(|_| NodeError::invalid_argument("CARRIER_DHT_PORT must be a valid u16"))?;
        }
        if let Ok(dir) = std::env::var("CARRIER_DHT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ipv4_address.is_none() && self.ipv6_address.is_none() {
            return Err(NodeError::invalid_argument("at least one address family must be enabled"));
        }
        if self.port == 0 {
            return Err(NodeError::invalid_argument("port must be in (0, 65535]"));
        }
        if self.data_dir.exists() && !self.data_dir.is_dir() {
            return Err(NodeError::invalid_argument("data_dir exists and is not a directory"));
        }
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| NodeError::invalid_argument(format!("data_dir is not writable: {e}")))?;
        info!(data_dir = %self.data_dir.display(), port = self.port, "config validated");
        Ok(())
    }

    pub fn ipv4_socket_addr(&self) -> Option<std::net::SocketAddr> {
        self.ipv4_address.map(|ip| std::net::SocketAddr::new(IpAddr::V4(ip), self.port))
    }

    pub fn ipv6_socket_addr(&self) -> Option<std::net::SocketAddr> {
        self.ipv6_address.map(|ip| std::net::SocketAddr::new(IpAddr::V6(ip), self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_no_address_family() {
        let mut config = Config::new("/tmp/carrier-dht-test-empty");
        config.ipv4_address = None;
        config.ipv6_address = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::new("/tmp/carrier-dht-test-port");
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        assert!(config.validate().is_ok());
    }
}
