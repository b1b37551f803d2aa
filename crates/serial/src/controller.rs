//! Serial controller façade
//!
//! Validates requests, drives role selection (client vs. server), starts
//! and stops the workers, and answers read/write/status queries against
//! the currently installed session. One controller manages one session
//! at a time.

use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use common::{
    Capability, CapabilityBridge, CapabilityDecision, LinkError, Result,
};
use tokio::sync::{Notify, RwLock, mpsc, oneshot};
use tracing::{debug, info};
use transport::{DiscoveryEvent, PeerAddr, PeerDirectory, Transport};

use crate::acceptor;
use crate::config::LinkConfig;
use crate::initiator;
use crate::pump::{PumpSlot, SessionPump};
use crate::state::{ConnectionState, Phase, SessionInfo};

/// The serial session façade
pub struct SerialController<T: Transport> {
    transport: T,
    state: Arc<ConnectionState>,
    slot: PumpSlot<T::Stream>,
    peers: PeerDirectory<T>,
    capabilities: CapabilityBridge,
    /// Cancel signal for the currently running acceptor/initiator; a
    /// fresh token per attempt so a stale permit cannot cancel the next
    worker_cancel: StdMutex<Option<Arc<Notify>>>,
    config: LinkConfig,
}

impl<T: Transport> SerialController<T> {
    pub fn new(transport: T, capabilities: CapabilityBridge, config: LinkConfig) -> Self {
        Self {
            peers: PeerDirectory::new(transport.clone()),
            state: Arc::new(ConnectionState::new()),
            slot: Arc::new(RwLock::new(None)),
            transport,
            capabilities,
            worker_cancel: StdMutex::new(None),
            config,
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Identity of the active session, if any
    pub fn session(&self) -> Option<SessionInfo> {
        self.state.session()
    }

    /// Whether the radio adapter is switched on
    pub fn is_enabled(&self) -> bool {
        self.transport.is_enabled()
    }

    /// Enumerate bonded peers; an empty list is valid
    pub async fn list(&self) -> Result<Vec<PeerAddr>> {
        Ok(self.peers.list().await?)
    }

    /// Sender the platform pushes discovery-found events into
    pub fn discovery_sink(&self) -> async_channel::Sender<DiscoveryEvent> {
        self.peers.discovery_sink()
    }

    /// Connect to `addr` in client role.
    ///
    /// Resolves once the session is ready or the attempt failed. A
    /// second request while one is in flight is rejected with
    /// `AlreadyActive` and leaves the original untouched.
    pub async fn connect(&self, addr: PeerAddr, secure: bool) -> Result<()> {
        if !self.transport.is_enabled() {
            return Err(LinkError::RadioDisabled);
        }
        self.ensure_capability(Capability::Radio).await?;

        let peer = self.peers.resolve(&addr);
        if let Some(name) = &peer.name {
            debug!("Resolved {} to \"{}\"", addr, name);
        }

        let (tx, rx) = oneshot::channel();
        self.state.begin(Phase::Connecting, tx)?;

        initiator::spawn(
            self.transport.clone(),
            peer,
            secure,
            self.state.clone(),
            self.slot.clone(),
            self.fresh_cancel(),
            self.read_chunk(),
        );

        rx.await
            .map_err(|_| LinkError::Channel("connect worker dropped its completion".to_string()))?
    }

    /// Wait for an inbound connection in server role.
    ///
    /// Resolves once a peer connects or the attempt failed/was
    /// cancelled.
    pub async fn listen(&self) -> Result<()> {
        if !self.transport.is_enabled() {
            return Err(LinkError::RadioDisabled);
        }
        self.ensure_capability(Capability::Radio).await?;

        let (tx, rx) = oneshot::channel();
        self.state.begin(Phase::Listening, tx)?;

        acceptor::spawn(
            self.transport.clone(),
            self.state.clone(),
            self.slot.clone(),
            self.fresh_cancel(),
            self.read_chunk(),
        );

        rx.await
            .map_err(|_| LinkError::Channel("accept worker dropped its completion".to_string()))?
    }

    /// Close the active session's stream.
    ///
    /// Success even if the stream was already half-closed; a second
    /// call finds no session and fails `NotConnected`.
    pub async fn disconnect(&self) -> Result<()> {
        let pump = { self.slot.write().await.take() };
        match pump {
            Some(pump) if !pump.dead() => {
                pump.close().await;
                self.state.disconnected();
                info!("Disconnected");
                Ok(())
            }
            // A dead pump means the session was already torn down; the
            // slot entry was just waiting to be pruned.
            Some(_) | None => Err(LinkError::NotConnected),
        }
    }

    /// Write the full buffer to the active session
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.active_pump().await?.write_all(data).await
    }

    /// Bytes buffered and ready without blocking
    pub async fn available(&self) -> Result<usize> {
        self.active_pump().await?.available()
    }

    /// Block until inbound data is available, return up to the
    /// configured chunk size
    pub async fn read(&self) -> Result<Bytes> {
        self.active_pump().await?.read_once().await
    }

    /// Accumulate until `delimiter`, returning the whole accumulation
    /// with the delimiter included
    pub async fn read_until(&self, delimiter: &[u8]) -> Result<Bytes> {
        self.active_pump().await?.read_until(delimiter).await
    }

    /// Start a standing subscription: every inbound byte is pushed as
    /// its own chunk until the stream's tail matches `delimiter`
    pub async fn subscribe(
        &self,
        delimiter: &[u8],
    ) -> Result<mpsc::UnboundedReceiver<Result<Bytes>>> {
        self.active_pump().await?.subscribe(delimiter.to_vec())
    }

    /// End any standing subscription and return to one-shot-read mode
    pub async fn unsubscribe(&self) -> Result<()> {
        self.active_pump().await?.unsubscribe();
        Ok(())
    }

    /// True iff a session exists and its stream reports itself open
    pub async fn is_connected(&self) -> bool {
        if self.state.session().is_none() {
            return false;
        }
        match self.slot.read().await.as_ref() {
            Some(pump) => pump.is_open(),
            None => false,
        }
    }

    /// Best-effort teardown at process shutdown: cancel any running
    /// worker and close an open session stream.
    pub async fn shutdown(&self) {
        let cancel = {
            self.worker_cancel
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
        };
        if let Some(cancel) = cancel {
            cancel.notify_one();
        }

        let pump = { self.slot.write().await.take() };
        if let Some(pump) = pump {
            pump.close().await;
        }
        if self.state.phase() == Phase::Connected {
            self.state.disconnected();
        }
        info!("Serial controller shut down");
    }

    async fn ensure_capability(&self, capability: Capability) -> Result<()> {
        match self.capabilities.ensure(capability).await? {
            CapabilityDecision::Granted => Ok(()),
            CapabilityDecision::Denied => Err(LinkError::PermissionDenied(capability)),
        }
    }

    fn fresh_cancel(&self) -> Arc<Notify> {
        let cancel = Arc::new(Notify::new());
        *self
            .worker_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());
        cancel
    }

    fn read_chunk(&self) -> usize {
        self.config.link.read_chunk
    }

    /// The active session's pump, pruning a stale entry left behind by
    /// a torn-down session.
    async fn active_pump(&self) -> Result<Arc<SessionPump<T::Stream>>> {
        {
            let guard = self.slot.read().await;
            match guard.as_ref() {
                Some(pump) if !pump.dead() => return Ok(pump.clone()),
                None => return Err(LinkError::NotConnected),
                Some(_) => {}
            }
        }

        let mut guard = self.slot.write().await;
        if guard.as_ref().is_some_and(|pump| pump.dead()) {
            *guard = None;
        }
        Err(LinkError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CapabilityRequest, create_capability_bridge, granted_bridge};
    use transport::MemoryHub;

    fn controller(transport: transport::MemoryTransport) -> SerialController<transport::MemoryTransport> {
        SerialController::new(transport, granted_bridge(), LinkConfig::default())
    }

    #[tokio::test]
    async fn test_list_zero_peers_is_empty() {
        let hub = MemoryHub::new();
        let ctl = controller(hub.node("aa:00"));
        assert!(ctl.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_with_radio_disabled() {
        let hub = MemoryHub::new();
        let node = hub.node("aa:00");
        node.set_enabled(false);
        let ctl = controller(node);

        let err = ctl.connect("bb:11".into(), true).await.unwrap_err();
        assert!(matches!(err, LinkError::RadioDisabled));
        assert_eq!(ctl.phase(), Phase::Idle);
        assert!(!ctl.is_enabled());
    }

    #[tokio::test]
    async fn test_connect_with_capability_denied() {
        let hub = MemoryHub::new();
        let (bridge, host) = create_capability_bridge();
        tokio::spawn(async move {
            while let Ok(CapabilityRequest::Ensure { response, .. }) = host.recv().await {
                let _ = response.send(common::CapabilityDecision::Denied);
            }
        });

        let ctl = SerialController::new(hub.node("aa:00"), bridge, LinkConfig::default());
        let err = ctl.connect("bb:11".into(), true).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::PermissionDenied(Capability::Radio)
        ));
        assert_eq!(ctl.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_ops_without_session_are_not_connected() {
        let hub = MemoryHub::new();
        let ctl = controller(hub.node("aa:00"));

        assert!(matches!(ctl.write(b"x").await, Err(LinkError::NotConnected)));
        assert!(matches!(ctl.available().await, Err(LinkError::NotConnected)));
        assert!(matches!(ctl.read().await, Err(LinkError::NotConnected)));
        assert!(matches!(
            ctl.read_until(b"\n").await,
            Err(LinkError::NotConnected)
        ));
        assert!(matches!(
            ctl.subscribe(b"\n").await,
            Err(LinkError::NotConnected)
        ));
        assert!(matches!(ctl.unsubscribe().await, Err(LinkError::NotConnected)));
        assert!(matches!(ctl.disconnect().await, Err(LinkError::NotConnected)));
        assert!(!ctl.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_to_absent_peer_fails_and_resets() {
        let hub = MemoryHub::new();
        let ctl = controller(hub.node("aa:00"));

        let err = ctl.connect("bb:11".into(), true).await.unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
        assert_eq!(ctl.phase(), Phase::Idle);
        assert!(!ctl.is_connected().await);
    }
}
