//! Transport trait abstraction for pluggable device links

use anyhow::Result;
use async_trait::async_trait;
use swarm_shared::{Ack, Command, ConnectError, DeviceAddress, SendError, Telemetry};

/// An established link to one device
///
/// Implementations are not assumed to be re-entrant; the owning session
/// serializes calls unless [`TransportLink::supports_interleaving`] says
/// telemetry reads may overlap command delivery.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Deliver one command and wait for the device's acknowledgement
    async fn send(&self, command: &Command) -> Result<Ack, SendError>;

    /// Read a fresh telemetry snapshot
    async fn receive_telemetry(&self) -> Result<Telemetry, SendError>;

    /// Release the underlying handle
    async fn shutdown(&self) -> Result<()>;

    /// Whether this link can carry `command` at all
    fn supports(&self, _command: &Command) -> bool {
        true
    }

    /// Whether telemetry reads may run while a command is in flight
    fn supports_interleaving(&self) -> bool {
        false
    }
}

/// Factory for creating device links
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Perform the transport handshake with `address`
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn TransportLink>, ConnectError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
