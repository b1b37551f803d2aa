//! Initiator: client-role connection worker
//!
//! Attempts one outbound connection on a dedicated task so the request
//! path never blocks on radio I/O. The attempt is raced against a cancel
//! signal; cancellation abandons the in-progress connect promptly and
//! reports the attempt as failed.

use std::io;
use std::sync::Arc;

use common::SERIAL_SERVICE;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transport::{PeerInfo, Transport};

use crate::pump::{PumpSlot, install_session};
use crate::state::{ConnectionState, Role};

pub(crate) fn spawn<T: Transport>(
    transport: T,
    peer: PeerInfo,
    secure: bool,
    state: Arc<ConnectionState>,
    slot: PumpSlot<T::Stream>,
    cancel: Arc<Notify>,
    read_chunk: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Discovery and connection setup contend for the radio; stop any
        // scan before dialing.
        transport.cancel_discovery().await;

        info!("Connecting to {} (secure: {})", peer.addr, secure);

        let stream = tokio::select! {
            _ = cancel.notified() => {
                debug!("Connect to {} cancelled", peer.addr);
                state.failed(
                    io::Error::new(io::ErrorKind::Interrupted, "connect cancelled").into(),
                );
                return;
            }
            res = transport.connect(&peer.addr, SERIAL_SERVICE, secure) => match res {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Connect to {} failed: {}", peer.addr, e);
                    state.failed(e.into());
                    return;
                }
            }
        };

        // A rejected install (state already reset) drops the stream,
        // leaving nothing half-open behind.
        install_session(stream, peer, Role::Client, &state, &slot, read_chunk).await;
    })
}
