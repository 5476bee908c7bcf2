//! Typed error taxonomy for swarm operations

use crate::{ConnectionState, DeviceAddress};
use thiserror::Error;

/// Errors raised while bringing a device session up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Device already registered: {0}")]
    DuplicateRegistration(DeviceAddress),

    #[error("Cannot connect a session in state {0}")]
    InvalidState(ConnectionState),

    #[error("Connect cancelled")]
    Cancelled,
}

/// Errors raised while delivering a command or reading telemetry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Session is {0}, expected connected")]
    InvalidState(ConnectionState),

    #[error("Command not supported by transport: {0}")]
    Unsupported(String),

    #[error("No response within {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Transport fault: {0}")]
    TransportFault(String),

    /// Another exchange held the device for the whole wait
    #[error("Device busy for {waited_ms}ms")]
    Busy { waited_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Raised when registering an address that already has a live session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Session already registered for {address} ({state})")]
pub struct DuplicateError {
    pub address: DeviceAddress,
    pub state: ConnectionState,
}

impl From<DuplicateError> for ConnectError {
    fn from(err: DuplicateError) -> Self {
        ConnectError::DuplicateRegistration(err.address)
    }
}

/// Structural errors that reject a whole swarm operation up front
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Target set is empty")]
    EmptyTargets,

    #[error("Swarm not connected. Call /connect first")]
    EmptySwarm,

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unsupported command: {0}")]
    Unsupported(String),
}

impl From<crate::codec::CodecError> for DispatchError {
    fn from(err: crate::codec::CodecError) -> Self {
        match err {
            crate::codec::CodecError::UnknownCommand(name) => DispatchError::Unsupported(name),
            other => DispatchError::MalformedCommand(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_converts_to_connect_error() {
        let err = DuplicateError {
            address: DeviceAddress::from("192.168.10.21"),
            state: ConnectionState::Connected,
        };
        let connect: ConnectError = err.into();
        assert_eq!(
            connect,
            ConnectError::DuplicateRegistration(DeviceAddress::from("192.168.10.21"))
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SendError::Timeout { after_ms: 7000 }.to_string(),
            "No response within 7000ms"
        );
        assert_eq!(
            SendError::InvalidState(ConnectionState::Faulted).to_string(),
            "Session is faulted, expected connected"
        );
    }
}
