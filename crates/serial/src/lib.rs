//! Serial session core for radiolink
//!
//! Implements the connection lifecycle state machine and its concurrent
//! I/O workers: the initiator (client role), the acceptor (server role),
//! and the session pump that owns the connected stream. The
//! [`SerialController`] façade ties them together behind the request
//! surface (list, connect, disconnect, read, write, subscribe, ...).

pub mod config;
pub mod controller;
pub mod scan;
pub mod state;

mod acceptor;
mod initiator;
mod pump;

pub use config::{LinkConfig, LinkSettings};
pub use controller::SerialController;
pub use scan::DelimiterScanner;
pub use state::{ConnectionState, Phase, Role, SessionInfo};
