//! Common error types

use crate::capability::Capability;
use thiserror::Error;

/// Errors reported by the serial link core.
///
/// Every variant maps to a discrete failure handed back to the caller;
/// none of them abort the process. An `Io` failure on the active session
/// additionally tears the session down.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Operation requires an active session and none exists
    #[error("Not connected.")]
    NotConnected,

    /// A connect, listen, read, or subscription is already in progress
    #[error("{0} already in progress")]
    AlreadyActive(&'static str),

    /// Required capability was not granted by the host
    #[error("Permission denied: {0}")]
    PermissionDenied(Capability),

    /// The radio adapter is switched off
    #[error("Radio is disabled.")]
    RadioDisabled,

    /// Stream ended before a delimiter match
    #[error("No data received.")]
    NoData,

    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal channel error (bridge or worker side gone)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
