//! Connection lifecycle state machine
//!
//! One shared state machine guards the whole session lifecycle. All
//! transitions happen under a single lock that is only ever held for the
//! transition itself, never across I/O: the workers block on accept,
//! connect, read, and write outside the lock and come back here only to
//! record the outcome.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use common::{LinkError, Result};
use tokio::sync::oneshot;
use tracing::{debug, info};
use transport::PeerInfo;

/// Lifecycle phase of the connection state machine.
///
/// `Idle → Listening → Connected → Idle` and
/// `Idle → Connecting → Connected | Idle`. `Listening` and `Connecting`
/// are mutually exclusive with each other and with `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No session and no worker active
    Idle,
    /// Acceptor is waiting for an inbound connection
    Listening,
    /// Initiator is attempting an outbound connection
    Connecting,
    /// A session is installed
    Connected,
}

/// Which side of the connection this endpoint took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiator of the connection
    Client,
    /// Acceptor of the connection
    Server,
}

/// Identity of the currently active session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Remote peer
    pub peer: PeerInfo,
    /// Our side of the connection
    pub role: Role,
    /// When the session was installed
    pub established_at: Instant,
}

/// Completion handle for an in-flight connect or listen request
pub(crate) type ConnectCompletion = oneshot::Sender<Result<()>>;

/// Outcome of an install attempt, decided atomically against the phase
pub(crate) enum Completion {
    /// Phase moved to `Connected`; resolve the pending completion (if
    /// any) once the pump is in place
    Installed(Option<ConnectCompletion>),
    /// Phase was `Idle` or `Connected`; the just-opened stream must be
    /// closed by the caller
    Rejected,
}

struct Inner {
    phase: Phase,
    session: Option<SessionInfo>,
    pending: Option<ConnectCompletion>,
}

/// The shared connection state machine
pub struct ConnectionState {
    inner: Mutex<Inner>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                session: None,
                pending: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-transition; the state itself
        // is a plain enum plus options, so recover the guard and move on.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Identity of the active session, if any
    pub fn session(&self) -> Option<SessionInfo> {
        self.lock().session.clone()
    }

    /// Start a connect or listen attempt.
    ///
    /// Rejects with `AlreadyActive` unless the machine is `Idle`; the
    /// original in-flight attempt (and its completion) is unaffected, so
    /// a second caller can never orphan the first.
    pub(crate) fn begin(&self, target: Phase, pending: ConnectCompletion) -> Result<()> {
        let mut inner = self.lock();
        match inner.phase {
            Phase::Idle => {
                debug_assert!(matches!(target, Phase::Listening | Phase::Connecting));
                inner.phase = target;
                inner.pending = Some(pending);
                debug!("Phase Idle -> {:?}", target);
                Ok(())
            }
            Phase::Listening => Err(LinkError::AlreadyActive("listen")),
            Phase::Connecting => Err(LinkError::AlreadyActive("connect")),
            Phase::Connected => Err(LinkError::AlreadyActive("session")),
        }
    }

    /// Atomically decide whether a freshly connected stream becomes the
    /// session.
    ///
    /// From `Listening` or `Connecting` the machine moves to `Connected`
    /// and hands back the pending completion; from `Idle` or `Connected`
    /// the stream is rejected and must be closed by the caller.
    pub(crate) fn try_complete(&self, session: SessionInfo) -> Completion {
        let mut inner = self.lock();
        match inner.phase {
            Phase::Listening | Phase::Connecting => {
                debug!("Phase {:?} -> Connected ({})", inner.phase, session.peer.addr);
                inner.phase = Phase::Connected;
                inner.session = Some(session);
                Completion::Installed(inner.pending.take())
            }
            Phase::Idle | Phase::Connected => Completion::Rejected,
        }
    }

    /// Record a failed connect or listen attempt.
    ///
    /// Resets to `Idle` and resolves the pending completion with the
    /// failure instead of success.
    pub(crate) fn failed(&self, err: LinkError) {
        let pending = {
            let mut inner = self.lock();
            debug!("Phase {:?} -> Idle (failed: {})", inner.phase, err);
            inner.phase = Phase::Idle;
            inner.session = None;
            inner.pending.take()
        };
        if let Some(tx) = pending {
            let _ = tx.send(Err(err));
        }
    }

    /// Record an explicit disconnect of the active session
    pub(crate) fn disconnected(&self) {
        self.clear("disconnect");
    }

    /// Record a session killed by a stream I/O failure.
    ///
    /// The operation that hit the failure reports its own error; other
    /// observers see the phase change on their next call.
    pub(crate) fn connection_lost(&self) {
        self.clear("connection lost");
    }

    fn clear(&self, reason: &str) {
        let pending = {
            let mut inner = self.lock();
            if inner.phase != Phase::Idle {
                info!("Phase {:?} -> Idle ({})", inner.phase, reason);
            }
            inner.phase = Phase::Idle;
            inner.session = None;
            inner.pending.take()
        };
        // A pending completion can only still exist here if teardown
        // raced an in-flight attempt; resolve it rather than orphan it.
        if let Some(tx) = pending {
            let _ = tx.send(Err(LinkError::Channel(format!(
                "attempt aborted: {reason}"
            ))));
        }
    }
}
