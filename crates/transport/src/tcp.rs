//! TCP-backed transport
//!
//! Radio stand-in over real sockets: peer addresses are `host:port`
//! strings and the service identifier is implied by the port. TCP carries
//! no cipher suite of its own, so the `secure` flag is acknowledged and
//! logged but not negotiated.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use common::ServiceId;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

use crate::peers::PeerAddr;
use crate::stream::{Listener, Transport};

/// Transport over TCP sockets
#[derive(Clone)]
pub struct TcpTransport {
    bind_addr: String,
    enabled: Arc<AtomicBool>,
    bonded: Arc<Mutex<Vec<PeerAddr>>>,
}

impl TcpTransport {
    /// Create a transport listening (in server role) on `bind_addr`,
    /// e.g. `127.0.0.1:0` to let the OS pick a port.
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            bonded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record `peer` as bonded
    pub fn bond(&self, peer: PeerAddr) {
        if let Ok(mut bonded) = self.bonded.lock() {
            bonded.push(peer);
        }
    }

    /// Flip the simulated adapter on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpLinkListener;

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
        let peer = peer.clone();
        async move {
            if !secure {
                debug!("Plaintext channel requested to {}", peer);
            }
            trace!("tcp connect {} (service {})", peer, service);
            let stream = TcpStream::connect(&peer.0).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }

    fn listen(&self, service: ServiceId) -> impl Future<Output = io::Result<Self::Listener>> + Send {
        let bind_addr = self.bind_addr.clone();
        async move {
            let inner = TcpListener::bind(&bind_addr).await?;
            debug!(
                "tcp listening at {} (service {})",
                inner.local_addr()?,
                service
            );
            Ok(TcpLinkListener { inner })
        }
    }

    fn cancel_discovery(&self) -> impl Future<Output = ()> + Send {
        // No discovery broadcast over TCP; nothing to cancel.
        async {}
    }
}

/// Listening TCP endpoint
pub struct TcpLinkListener {
    inner: TcpListener,
}

impl TcpLinkListener {
    /// The address the OS actually bound, useful with port 0
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl Listener for TcpLinkListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, PeerAddr)>> + Send {
        async {
            let (stream, remote) = self.inner.accept().await?;
            stream.set_nodelay(true)?;
            Ok((stream, PeerAddr(remote.to_string())))
        }
    }
}
