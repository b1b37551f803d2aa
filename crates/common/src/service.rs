//! Serial service identifier
//!
//! Well-known identifier selecting the serial profile on the remote peer.
//! Both roles register/dial the same identifier; only matching endpoints
//! can establish a session.

use std::fmt;

/// Identifier for a service profile on a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub &'static str);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The well-known serial port profile identifier
///
/// Shared by client and server roles; fixed for this system.
pub const SERIAL_SERVICE: ServiceId = ServiceId("00001101-0000-1000-8000-00805F9B34FB");
