//! Byte-stream socket traits
//!
//! The radio transport exposes an unframed, connection-oriented byte
//! stream. The core never names a concrete socket type; it is generic
//! over these traits so the platform (or a test harness) supplies the
//! actual sockets.

use std::future::Future;
use std::io;

use common::ServiceId;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::peers::PeerAddr;

/// A connected socket's readable/writable halves.
///
/// Blanket-implemented for anything tokio can read and write; the pump
/// splits it with [`tokio::io::split`] so the reader and writer sides
/// never contend on one lock.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A listening endpoint registered under a service identifier.
pub trait Listener: Send + 'static {
    /// Stream type produced by accepted connections
    type Stream: ByteStream;

    /// Block until the next inbound connection attempt.
    ///
    /// Returns the connected stream and the remote peer's address.
    /// Unblocks with an error once the endpoint is closed.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, PeerAddr)>> + Send;
}

/// The platform's radio socket primitive.
///
/// Handles are cheap clones sharing one adapter, mirroring how a platform
/// exposes a single radio to many callers.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Connected stream type
    type Stream: ByteStream;
    /// Listening endpoint type
    type Listener: Listener<Stream = Self::Stream>;

    /// Whether the radio adapter is switched on
    fn is_enabled(&self) -> bool;

    /// Enumerate currently bonded peers.
    ///
    /// An empty list is valid, not an error. Ordering is only stable
    /// within a single call.
    fn bonded_peers(&self) -> impl Future<Output = io::Result<Vec<PeerAddr>>> + Send;

    /// Open an outbound connection to `peer` for the given service.
    ///
    /// `secure` selects an encrypted channel where the transport supports
    /// one. Implementations must leave no half-open resource behind on
    /// failure.
    fn connect(
        &self,
        peer: &PeerAddr,
        service: ServiceId,
        secure: bool,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    /// Open a listening endpoint registered under `service`.
    fn listen(&self, service: ServiceId) -> impl Future<Output = io::Result<Self::Listener>> + Send;

    /// Stop any ongoing peer discovery.
    ///
    /// Discovery and connection setup contend for the radio, so the
    /// initiator calls this before every outbound attempt.
    fn cancel_discovery(&self) -> impl Future<Output = ()> + Send;
}
