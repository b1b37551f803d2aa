//! Acceptor: server-role connection worker
//!
//! Opens a listening endpoint under the serial service and accepts
//! inbound attempts in a loop. Single-session policy: the first accepted
//! socket that the state machine admits becomes the session and the
//! listener is closed; sockets arriving at the wrong moment are closed
//! (rejected) without disturbing anything.

use std::io;
use std::sync::Arc;

use common::SERIAL_SERVICE;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transport::{Listener, PeerInfo, Transport};

use crate::pump::{PumpSlot, install_session};
use crate::state::{ConnectionState, Phase, Role};

pub(crate) fn spawn<T: Transport>(
    transport: T,
    state: Arc<ConnectionState>,
    slot: PumpSlot<T::Stream>,
    cancel: Arc<Notify>,
    read_chunk: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut listener = tokio::select! {
            _ = cancel.notified() => {
                debug!("Listen cancelled before the endpoint opened");
                state.failed(
                    io::Error::new(io::ErrorKind::Interrupted, "listen cancelled").into(),
                );
                return;
            }
            res = transport.listen(SERIAL_SERVICE) => match res {
                Ok(listener) => listener,
                Err(e) => {
                    warn!("Failed to open listening endpoint: {}", e);
                    state.failed(e.into());
                    return;
                }
            }
        };

        info!("Listening for inbound connections");

        loop {
            tokio::select! {
                _ = cancel.notified() => {
                    debug!("Accept loop cancelled");
                    if state.phase() == Phase::Listening {
                        state.failed(
                            io::Error::new(io::ErrorKind::Interrupted, "listen cancelled").into(),
                        );
                    }
                    break;
                }
                res = listener.accept() => match res {
                    Ok((stream, remote)) => {
                        let peer = PeerInfo::unnamed(remote);
                        if install_session(stream, peer, Role::Server, &state, &slot, read_chunk)
                            .await
                        {
                            // Session installed; stop accepting and close
                            // the listening endpoint.
                            break;
                        }
                        // Rejected (wrong phase): socket already closed,
                        // keep listening.
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        if state.phase() == Phase::Listening {
                            state.failed(e.into());
                        }
                        break;
                    }
                }
            }
        }
    })
}
