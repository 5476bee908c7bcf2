//! Swarm coordinator
//!
//! Dispatches commands to a swarm of independently connected drones,
//! tracks each device's session, and samples telemetry in the background.

pub mod api;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod health;
pub mod session;
pub mod transport;

pub use command::{CommandDispatcher, DispatcherConfig};
pub use config::{CoordinatorConfig, Options};
pub use coordinator::Coordinator;
pub use discovery::{Discovery, ProbeConfig, ProbeDiscovery, StaticDiscovery};
pub use health::{HealthEvent, HealthSampler, SamplerConfig, SamplerHandle};
pub use session::{DeviceSession, SessionHandle, SessionInfo, SwarmRegistry};
pub use transport::{SimConnector, TransportConnector, TransportLink, UdpConnector};
