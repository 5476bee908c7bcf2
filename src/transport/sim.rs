//! Simulated transport for development and tests
//!
//! Each address gets a [`SimProfile`] describing how the fake device
//! behaves. Every command delivery is recorded with its start and end
//! instants so callers can check ordering and overlap.

use crate::transport::traits::{TransportConnector, TransportLink};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_shared::{Ack, Command, ConnectError, DeviceAddress, SendError, Telemetry};
use tokio::time::Instant;

/// How a simulated device answers the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimHandshake {
    #[default]
    Accept,
    Unreachable,
    ProtocolMismatch,
}

/// Behaviour of one simulated device
#[derive(Debug, Clone)]
pub struct SimProfile {
    pub handshake: SimHandshake,
    /// Delay before the handshake completes
    pub connect_latency: Duration,
    /// Delay before each command is acknowledged
    pub command_latency: Duration,
    /// Delay before each telemetry read completes
    pub telemetry_latency: Duration,
    pub battery_percent: u8,
    /// Reject every command with a transport fault
    pub fail_commands: bool,
    /// Commands (by name) the device does not carry
    pub unsupported: Vec<&'static str>,
    pub interleaving: bool,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            handshake: SimHandshake::Accept,
            connect_latency: Duration::ZERO,
            command_latency: Duration::from_millis(10),
            telemetry_latency: Duration::from_millis(5),
            battery_percent: 90,
            fail_commands: false,
            unsupported: Vec::new(),
            interleaving: false,
        }
    }
}

impl SimProfile {
    pub fn unreachable() -> Self {
        Self {
            handshake: SimHandshake::Unreachable,
            ..Default::default()
        }
    }

    pub fn slow(command_latency: Duration) -> Self {
        Self {
            command_latency,
            ..Default::default()
        }
    }
}

/// One recorded command delivery
#[derive(Debug, Clone)]
pub struct SimEvent {
    pub address: DeviceAddress,
    pub command: Command,
    pub started: Instant,
    pub finished: Instant,
}

/// Shared record of deliveries across all simulated links
#[derive(Debug, Clone, Default)]
pub struct SimLog {
    events: Arc<Mutex<Vec<SimEvent>>>,
    shutdowns: Arc<Mutex<Vec<DeviceAddress>>>,
}

impl SimLog {
    fn push(&self, event: SimEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn push_shutdown(&self, address: DeviceAddress) {
        if let Ok(mut shutdowns) = self.shutdowns.lock() {
            shutdowns.push(address);
        }
    }

    /// All completed deliveries, in completion order
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Completed deliveries for one address
    pub fn events_for(&self, address: &DeviceAddress) -> Vec<SimEvent> {
        self.events()
            .into_iter()
            .filter(|e| &e.address == address)
            .collect()
    }

    /// Addresses whose links were released
    pub fn shutdowns(&self) -> Vec<DeviceAddress> {
        self.shutdowns.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Link to one simulated device
pub struct SimLink {
    address: DeviceAddress,
    profile: SimProfile,
    battery: Mutex<u8>,
    log: SimLog,
}

#[async_trait]
impl TransportLink for SimLink {
    async fn send(&self, command: &Command) -> Result<Ack, SendError> {
        let started = Instant::now();
        tokio::time::sleep(self.profile.command_latency).await;
        let finished = Instant::now();

        self.log.push(SimEvent {
            address: self.address.clone(),
            command: *command,
            started,
            finished,
        });

        if self.profile.fail_commands {
            return Err(SendError::TransportFault(format!(
                "{} rejected by simulated device",
                command.name()
            )));
        }

        // Flying drains the pack a little
        if let Ok(mut battery) = self.battery.lock() {
            *battery = battery.saturating_sub(1);
        }

        Ok(Ack::new(
            "ok",
            finished.duration_since(started).as_millis() as u64,
        ))
    }

    async fn receive_telemetry(&self) -> Result<Telemetry, SendError> {
        tokio::time::sleep(self.profile.telemetry_latency).await;
        let percent = self
            .battery
            .lock()
            .map(|b| *b)
            .map_err(|_| SendError::TransportFault("battery state poisoned".into()))?;
        Ok(Telemetry::new(percent))
    }

    async fn shutdown(&self) -> Result<()> {
        self.log.push_shutdown(self.address.clone());
        Ok(())
    }

    fn supports(&self, command: &Command) -> bool {
        !self.profile.unsupported.contains(&command.name())
    }

    fn supports_interleaving(&self) -> bool {
        self.profile.interleaving
    }
}

/// Connector producing simulated links
#[derive(Debug, Clone, Default)]
pub struct SimConnector {
    default_profile: SimProfile,
    profiles: HashMap<DeviceAddress, SimProfile>,
    log: SimLog,
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the behaviour of one address
    pub fn with_profile(mut self, address: impl Into<DeviceAddress>, profile: SimProfile) -> Self {
        self.profiles.insert(address.into(), profile);
        self
    }

    /// Behaviour used for addresses without an explicit profile
    pub fn with_default_profile(mut self, profile: SimProfile) -> Self {
        self.default_profile = profile;
        self
    }

    /// Handle onto the delivery log shared by all links
    pub fn log(&self) -> SimLog {
        self.log.clone()
    }

    fn profile_for(&self, address: &DeviceAddress) -> SimProfile {
        self.profiles
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.default_profile.clone())
    }
}

#[async_trait]
impl TransportConnector for SimConnector {
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn TransportLink>, ConnectError> {
        let profile = self.profile_for(address);
        tokio::time::sleep(profile.connect_latency).await;

        match profile.handshake {
            SimHandshake::Accept => Ok(Box::new(SimLink {
                address: address.clone(),
                battery: Mutex::new(profile.battery_percent),
                profile,
                log: self.log.clone(),
            })),
            SimHandshake::Unreachable => Err(ConnectError::Unreachable(format!(
                "{}: no route to simulated device",
                address
            ))),
            SimHandshake::ProtocolMismatch => Err(ConnectError::ProtocolMismatch(format!(
                "{}: simulated device speaks another protocol",
                address
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "Simulated"
    }
}
