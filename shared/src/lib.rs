//! Swarm Shared Types
//!
//! This crate provides the data model, the typed error taxonomy, the session
//! state machine and the command codec shared by every part of the swarm
//! coordinator.

pub mod codec;
pub mod error;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

pub use error::{ConnectError, DispatchError, DuplicateError, SendError};

static CLOCK_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed on a monotonic clock since the first call in this process
pub fn monotonic_ms() -> u64 {
    CLOCK_ORIGIN.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Timing and threshold parameters for the coordinator
pub mod timing {
    /// Upper bound for a single command exchange with one device
    pub const COMMAND_TIMEOUT_MS: u64 = 7000;

    /// Upper bound for the transport handshake
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Upper bound for a single telemetry read
    pub const TELEMETRY_TIMEOUT_MS: u64 = 3000;

    /// Cadence of the background health sampler
    pub const SAMPLE_INTERVAL_MS: u64 = 10000;

    /// Per-host timeout used while probing a network range
    pub const PROBE_TIMEOUT_MS: u64 = 500;

    /// Battery percentage at or below which a health warning is raised
    pub const BATTERY_LOW_PERCENT: u8 = 20;

    /// UDP port devices listen on for text commands
    pub const COMMAND_PORT: u16 = 8889;
}

/// Network identity of one vehicle, unique within a swarm
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

impl From<std::net::IpAddr> for DeviceAddress {
    fn from(ip: std::net::IpAddr) -> Self {
        Self(ip.to_string())
    }
}

/// Connection lifecycle of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Whether the coordinator believes the vehicle is in the air
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    #[default]
    Grounded,
    Airborne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

/// The closed set of commands a swarm member can be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Takeoff,
    Land,
    Flip { direction: FlipDirection },
    Move { direction: MoveDirection, distance_cm: u32 },
    Stop,
    End,
}

impl Command {
    /// Short lowercase name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Takeoff => "takeoff",
            Command::Land => "land",
            Command::Flip { .. } => "flip",
            Command::Move { .. } => "move",
            Command::Stop => "stop",
            Command::End => "end",
        }
    }

    /// Check whether a session in `state` may receive this command
    pub fn precondition_met(&self, state: ConnectionState) -> bool {
        // Every command in the set needs a live link
        state == ConnectionState::Connected
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Flip { direction } => write!(f, "flip({:?})", direction),
            Command::Move {
                direction,
                distance_cm,
            } => write!(f, "move({:?}, {}cm)", direction, distance_cm),
            other => f.write_str(other.name()),
        }
    }
}

/// One telemetry snapshot for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    pub battery_percent: u8,
    /// Monotonic milliseconds, see [`monotonic_ms`]
    pub timestamp_ms: u64,
}

impl Telemetry {
    /// Create a snapshot stamped with the current monotonic time
    pub fn new(battery_percent: u8) -> Self {
        Self {
            battery_percent: battery_percent.min(100),
            timestamp_ms: monotonic_ms(),
        }
    }

    pub fn is_battery_low(&self, threshold_percent: u8) -> bool {
        self.battery_percent <= threshold_percent
    }
}

/// Acknowledgement of a delivered command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub response: String,
    pub elapsed_ms: u64,
}

impl Ack {
    pub fn new(response: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            response: response.into(),
            elapsed_ms,
        }
    }
}

/// Why an attempted operation did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Unreachable,
    ProtocolMismatch,
    DuplicateRegistration,
    Unsupported,
    Timeout,
    TransportFault(String),
    Cancelled,
}

/// Why an operation was never attempted for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotRegistered,
    InvalidState(ConnectionState),
    /// Occupied by a command for longer than the caller would wait
    Busy,
}

/// Terminal outcome of one per-device operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success(T),
    Failed(FailureReason),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<ConnectError> for Outcome<T> {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Unreachable(_) => Outcome::Failed(FailureReason::Unreachable),
            ConnectError::ProtocolMismatch(_) => Outcome::Failed(FailureReason::ProtocolMismatch),
            ConnectError::DuplicateRegistration(_) => {
                Outcome::Failed(FailureReason::DuplicateRegistration)
            }
            ConnectError::InvalidState(state) => Outcome::Skipped(SkipReason::InvalidState(state)),
            ConnectError::Cancelled => Outcome::Failed(FailureReason::Cancelled),
        }
    }
}

impl<T> From<SendError> for Outcome<T> {
    fn from(err: SendError) -> Self {
        match err {
            // Nothing reached the wire, so the device was skipped rather than failed
            SendError::InvalidState(state) => Outcome::Skipped(SkipReason::InvalidState(state)),
            SendError::Unsupported(_) => Outcome::Failed(FailureReason::Unsupported),
            SendError::Timeout { .. } => Outcome::Failed(FailureReason::Timeout),
            SendError::TransportFault(msg) => Outcome::Failed(FailureReason::TransportFault(msg)),
            SendError::Busy { .. } => Outcome::Skipped(SkipReason::Busy),
            SendError::Cancelled => Outcome::Failed(FailureReason::Cancelled),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T>
where
    Outcome<T>: From<E>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => err.into(),
        }
    }
}

/// Per-device accounting of one swarm-wide operation
///
/// Every requested address appears exactly once; the first outcome recorded
/// for an address is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SwarmResult<T> {
    outcomes: HashMap<DeviceAddress, Outcome<T>>,
}

impl<T> Default for SwarmResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SwarmResult<T> {
    pub fn new() -> Self {
        Self {
            outcomes: HashMap::new(),
        }
    }

    /// Record the outcome for `address`; returns false if it was already settled
    pub fn record(&mut self, address: DeviceAddress, outcome: Outcome<T>) -> bool {
        match self.outcomes.entry(address) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(outcome);
                true
            }
        }
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&Outcome<T>> {
        self.outcomes.get(address)
    }

    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.outcomes.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceAddress, &Outcome<T>)> {
        self.outcomes.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &DeviceAddress> {
        self.outcomes.keys()
    }

    pub fn into_inner(self) -> HashMap<DeviceAddress, Outcome<T>> {
        self.outcomes
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_skipped()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(Outcome::is_success)
    }

    /// Check that the key set equals `targets` exactly
    pub fn covers<'a, I>(&self, targets: I) -> bool
    where
        I: IntoIterator<Item = &'a DeviceAddress>,
    {
        let expected: std::collections::HashSet<&DeviceAddress> = targets.into_iter().collect();
        expected.len() == self.outcomes.len()
            && expected.iter().all(|address| self.outcomes.contains_key(*address))
    }
}

impl<T> IntoIterator for SwarmResult<T> {
    type Item = (DeviceAddress, Outcome<T>);
    type IntoIter = std::collections::hash_map::IntoIter<DeviceAddress, Outcome<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}
