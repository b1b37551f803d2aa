//! Capability bridge between the link core and the host environment
//!
//! Radio operations are gated by runtime permission grants that only the
//! host environment can obtain (it owns the prompt UI). The core never
//! fails a caller outright on a missing grant: it sends a request over
//! this bridge and defers until the host answers granted or denied.

use async_channel::{Receiver, Sender, bounded};
use std::fmt;
use tracing::debug;

/// A named runtime permission gating a sensitive operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Use of the radio (connect, listen, transfer)
    Radio,
    /// Coarse location, required by some platforms for peer discovery
    Location,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Radio => f.write_str("radio"),
            Capability::Location => f.write_str("location"),
        }
    }
}

/// Host's answer to a capability request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityDecision {
    Granted,
    Denied,
}

/// Requests from the link core to the host
#[derive(Debug)]
pub enum CapabilityRequest {
    /// Check the named capability, prompting the user if necessary
    Ensure {
        /// Capability being requested
        capability: Capability,
        /// Channel to send the decision back
        response: tokio::sync::oneshot::Sender<CapabilityDecision>,
    },
}

/// Handle for the link core (async)
#[derive(Clone)]
pub struct CapabilityBridge {
    req_tx: Sender<CapabilityRequest>,
}

impl CapabilityBridge {
    /// Ask the host to ensure a capability, waiting for its decision.
    ///
    /// Blocks (asynchronously) until the host answers; a connect attempt
    /// made before the grant exists is thereby deferred, not failed.
    pub async fn ensure(&self, capability: Capability) -> crate::Result<CapabilityDecision> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.req_tx
            .send(CapabilityRequest::Ensure {
                capability,
                response: tx,
            })
            .await
            .map_err(|e| crate::LinkError::Channel(e.to_string()))?;

        let decision = rx
            .await
            .map_err(|e| crate::LinkError::Channel(e.to_string()))?;
        debug!("Capability {}: {:?}", capability, decision);
        Ok(decision)
    }
}

/// Handle for the host environment
pub struct CapabilityHost {
    /// Request receiver (public for the host's prompt loop to consume)
    pub req_rx: Receiver<CapabilityRequest>,
}

impl CapabilityHost {
    /// Receive the next capability request from the core
    pub async fn recv(&self) -> crate::Result<CapabilityRequest> {
        self.req_rx
            .recv()
            .await
            .map_err(|e| crate::LinkError::Channel(e.to_string()))
    }
}

/// Create the capability bridge between the link core and the host
///
/// Returns (CapabilityBridge for the core, CapabilityHost for the host)
pub fn create_capability_bridge() -> (CapabilityBridge, CapabilityHost) {
    let (req_tx, req_rx) = bounded(16);

    (CapabilityBridge { req_tx }, CapabilityHost { req_rx })
}

/// A bridge whose host grants every request.
///
/// For tests and embedders on platforms without a runtime permission model.
pub fn granted_bridge() -> CapabilityBridge {
    let (bridge, host) = create_capability_bridge();
    tokio::spawn(async move {
        while let Ok(CapabilityRequest::Ensure { response, .. }) = host.recv().await {
            let _ = response.send(CapabilityDecision::Granted);
        }
    });
    bridge
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bridge_round_trip() {
        let (bridge, host) = create_capability_bridge();

        tokio::spawn(async move {
            match host.recv().await.unwrap() {
                CapabilityRequest::Ensure {
                    capability,
                    response,
                } => {
                    assert_eq!(capability, Capability::Radio);
                    response.send(CapabilityDecision::Denied).unwrap();
                }
            }
        });

        let decision = bridge.ensure(Capability::Radio).await.unwrap();
        assert_eq!(decision, CapabilityDecision::Denied);
    }

    #[tokio::test]
    async fn test_granted_bridge() {
        let bridge = granted_bridge();
        let decision = bridge.ensure(Capability::Location).await.unwrap();
        assert_eq!(decision, CapabilityDecision::Granted);
    }

    #[tokio::test]
    async fn test_closed_host_is_channel_error() {
        let (bridge, host) = create_capability_bridge();
        drop(host);

        let err = bridge.ensure(Capability::Radio).await.unwrap_err();
        assert!(matches!(err, crate::LinkError::Channel(_)));
    }
}
