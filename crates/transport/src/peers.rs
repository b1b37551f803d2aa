//! Peer identity and the peer directory
//!
//! The directory answers "who can I talk to": it enumerates bonded peers
//! through the transport and caches discovery-found events delivered
//! asynchronously by the platform. The discovery path is informational
//! only; it never gates connection success.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::stream::Transport;

/// Opaque stable identifier for a remote endpoint (platform address string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr(pub String);

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddr {
    fn from(s: &str) -> Self {
        PeerAddr(s.to_string())
    }
}

impl From<String> for PeerAddr {
    fn from(s: String) -> Self {
        PeerAddr(s)
    }
}

/// A peer description, possibly enriched by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Stable platform address
    pub addr: PeerAddr,
    /// Display name, when discovery has seen one
    pub name: Option<String>,
}

impl PeerInfo {
    /// A bare description carrying only the address
    pub fn unnamed(addr: PeerAddr) -> Self {
        Self { addr, name: None }
    }
}

/// Discovery events delivered asynchronously by the platform
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A peer was seen during discovery
    Found(PeerInfo),
}

/// Directory of bonded and discovered peers
pub struct PeerDirectory<T: Transport> {
    transport: T,
    discovered: Arc<Mutex<HashMap<PeerAddr, PeerInfo>>>,
}

impl<T: Transport> PeerDirectory<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            discovered: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// List the platform's currently bonded peers.
    ///
    /// Zero bonded peers yields an empty list, not an error.
    pub async fn list(&self) -> io::Result<Vec<PeerAddr>> {
        let peers = self.transport.bonded_peers().await?;
        debug!("Enumerated {} bonded peer(s)", peers.len());
        Ok(peers)
    }

    /// Create a sender the platform pushes discovery events into.
    ///
    /// A consumer task drains the feed into the discovery cache. The
    /// sender may be dropped at any time; the consumer just ends.
    pub fn discovery_sink(&self) -> async_channel::Sender<DiscoveryEvent> {
        let (tx, rx) = async_channel::bounded(256);
        let discovered = self.discovered.clone();

        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    DiscoveryEvent::Found(info) => {
                        debug!("Discovered peer {} ({:?})", info.addr, info.name);
                        let mut cache = match discovered.lock() {
                            Ok(cache) => cache,
                            Err(e) => {
                                warn!("Discovery cache poisoned: {}", e);
                                break;
                            }
                        };
                        cache.insert(info.addr.clone(), info);
                    }
                }
            }
            debug!("Discovery feed closed");
        });

        tx
    }

    /// Resolve an address to the richest description we have.
    ///
    /// Falls back to an unnamed description when discovery never saw the
    /// peer; resolution never fails.
    pub fn resolve(&self, addr: &PeerAddr) -> PeerInfo {
        self.discovered
            .lock()
            .ok()
            .and_then(|cache| cache.get(addr).cloned())
            .unwrap_or_else(|| PeerInfo::unnamed(addr.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHub;

    #[tokio::test]
    async fn test_list_zero_bonded_peers_is_empty() {
        let hub = MemoryHub::new();
        let directory = PeerDirectory::new(hub.node("aa:00"));

        let peers = directory.list().await.unwrap();
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn test_list_returns_bonded_peers() {
        let hub = MemoryHub::new();
        let node = hub.node("aa:00");
        node.bond("bb:11".into());
        node.bond("cc:22".into());

        let directory = PeerDirectory::new(node);
        let peers = directory.list().await.unwrap();
        assert_eq!(peers, vec![PeerAddr::from("bb:11"), PeerAddr::from("cc:22")]);
    }

    #[tokio::test]
    async fn test_resolve_uses_discovery_cache() {
        let hub = MemoryHub::new();
        let directory = PeerDirectory::new(hub.node("aa:00"));
        let sink = directory.discovery_sink();

        sink.send(DiscoveryEvent::Found(PeerInfo {
            addr: "bb:11".into(),
            name: Some("printer".to_string()),
        }))
        .await
        .unwrap();

        // Feed consumption is async; poll until the cache catches up.
        let addr = PeerAddr::from("bb:11");
        for _ in 0..50 {
            if directory.resolve(&addr).name.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let info = directory.resolve(&addr);
        assert_eq!(info.name.as_deref(), Some("printer"));

        // Unknown peers resolve to a bare description.
        let other = directory.resolve(&"dd:33".into());
        assert_eq!(other, PeerInfo::unnamed("dd:33".into()));
    }
}
