//! In-memory transport
//!
//! A hub of in-process duplex pipes implementing the [`Transport`] trait.
//! Each node gets an address; listening registers the node in the hub and
//! connecting looks the peer up. Used throughout the test suites and by
//! embedders that run both roles in one process.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use common::ServiceId;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::peers::PeerAddr;
use crate::stream::{Listener, Transport};

const PIPE_CAPACITY: usize = 64 * 1024;

type Inbound = (DuplexStream, PeerAddr);

/// Shared registry of listening nodes
#[derive(Clone, Default)]
pub struct MemoryHub {
    listeners: Arc<Mutex<HashMap<PeerAddr, mpsc::UnboundedSender<Inbound>>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport handle for a node at `addr`
    pub fn node(&self, addr: &str) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            addr: PeerAddr::from(addr),
            enabled: Arc::new(AtomicBool::new(true)),
            bonded: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// One node's view of the in-memory hub
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    addr: PeerAddr,
    enabled: Arc<AtomicBool>,
    bonded: Arc<Mutex<Vec<PeerAddr>>>,
}

impl MemoryTransport {
    /// This node's own address
    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    /// Record `peer` as bonded with this node
    pub fn bond(&self, peer: PeerAddr) {
        if let Ok(mut bonded) = self.bonded.lock() {
            bonded.push(peer);
        }
    }

    /// Flip the simulated adapter on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn lock_listeners(
        &self,
    ) -> io::Result<std::sync::MutexGuard<'_, HashMap<PeerAddr, mpsc::UnboundedSender<Inbound>>>>
    {
        self.hub
            .listeners
            .lock()
            .map_err(|_| io::Error::other("hub registry poisoned"))
    }
}

impl Transport for MemoryTransport {
    type Stream = DuplexStream;
    type Listener = MemoryListener;

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn bonded_peers(&self) -> impl Future<Output = io::Result<Vec<PeerAddr>>> + Send {
        let bonded = self.bonded.clone();
        async move {
            bonded
                .lock()
                .map(|peers| peers.clone())
                .map_err(|_| io::Error::other("bonded registry poisoned"))
        }
    }

    fn connect(
        &self,
        peer: &PeerAddr,
        service: ServiceId,
        secure: bool,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send {
        let this = self.clone();
        let peer = peer.clone();
        async move {
            trace!(
                "memory connect {} -> {} (service {}, secure {})",
                this.addr, peer, service, secure
            );

            let sender = {
                let listeners = this.lock_listeners()?;
                listeners.get(&peer).cloned()
            };
            let sender = sender.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "peer is not listening")
            })?;

            let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
            sender.send((remote, this.addr.clone())).map_err(|_| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "peer stopped listening")
            })?;

            Ok(local)
        }
    }

    fn listen(&self, service: ServiceId) -> impl Future<Output = io::Result<Self::Listener>> + Send {
        let this = self.clone();
        async move {
            trace!("memory listen at {} (service {})", this.addr, service);

            let (tx, rx) = mpsc::unbounded_channel();
            {
                let mut listeners = this.lock_listeners()?;
                listeners.insert(this.addr.clone(), tx);
            }

            Ok(MemoryListener {
                hub: this.hub.clone(),
                addr: this.addr.clone(),
                rx,
            })
        }
    }

    fn cancel_discovery(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Listening endpoint on the in-memory hub
pub struct MemoryListener {
    hub: MemoryHub,
    addr: PeerAddr,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Listener for MemoryListener {
    type Stream = DuplexStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, PeerAddr)>> + Send {
        async {
            self.rx.recv().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::BrokenPipe, "listening endpoint closed")
            })
        }
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        // Deregister so later connects see ConnectionRefused instead of a
        // sender pointing at a dead receiver.
        if let Ok(mut listeners) = self.hub.listeners.lock() {
            listeners.remove(&self.addr);
        }
    }
}
