//! Session management for tracking registered devices
//!
//! This module handles:
//! - One session per device address, owning its link and connection state
//! - Strict serialization of commands to a single device
//! - Cancellation of in-flight work on disconnect

mod connection;
mod registry;

pub use connection::{DeviceSession, SessionHandle, SessionInfo};
pub use registry::{Resolution, SwarmRegistry};
