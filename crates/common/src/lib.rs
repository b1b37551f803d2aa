//! Common utilities for radiolink
//!
//! This crate provides functionality shared by the transport and serial
//! crates: the error taxonomy, logging setup, the well-known serial service
//! identifier, and the capability bridge used to ask the host environment
//! for runtime permission grants.

pub mod capability;
pub mod error;
pub mod logging;
pub mod service;

pub use capability::{
    Capability, CapabilityBridge, CapabilityDecision, CapabilityHost, CapabilityRequest,
    create_capability_bridge, granted_bridge,
};
pub use error::{LinkError, Result};
pub use logging::setup_logging;
pub use service::{SERIAL_SERVICE, ServiceId};
