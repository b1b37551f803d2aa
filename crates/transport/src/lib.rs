//! Transport boundary for radiolink
//!
//! This crate defines what the serial core requires from the platform's
//! radio stack: a connection-oriented byte-stream socket primitive
//! (listen/accept, connect, read, write, close), bonded-peer enumeration,
//! and an asynchronous discovery-event feed. Two implementations ship
//! in-tree: a TCP-backed transport for real sockets and an in-memory hub
//! used by the test suites and by embedders that run both roles in one
//! process.

pub mod memory;
pub mod peers;
pub mod stream;
pub mod tcp;

pub use memory::{MemoryHub, MemoryListener, MemoryTransport};
pub use peers::{DiscoveryEvent, PeerAddr, PeerDirectory, PeerInfo};
pub use stream::{ByteStream, Listener, Transport};
pub use tcp::{TcpLinkListener, TcpTransport};
