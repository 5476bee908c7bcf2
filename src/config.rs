//! Coordinator configuration and command line options

use crate::command::DispatcherConfig;
use crate::health::SamplerConfig;
use ipnet::Ipv4Net;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use structopt::StructOpt;
use swarm_shared::{timing, DeviceAddress};

const DEFAULT_NETWORK: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 10, 0), 24);

/// Command line options
#[derive(Debug, StructOpt)]
#[structopt(name = "swarm-coordinator", about = "Dispatch commands to a swarm of drones")]
pub struct Options {
    /// Address the HTTP interface listens on
    #[structopt(long, default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Network range scanned for devices
    #[structopt(long, default_value = "192.168.10.0/24")]
    pub network: Ipv4Net,

    #[structopt(long, default_value = "7000")]
    pub command_timeout_ms: u64,

    #[structopt(long, default_value = "5000")]
    pub connect_timeout_ms: u64,

    #[structopt(long, default_value = "3000")]
    pub telemetry_timeout_ms: u64,

    /// Background telemetry cadence (0 disables sampling)
    #[structopt(long, default_value = "10000")]
    pub sample_interval_ms: u64,

    /// Battery percentage at or below which a warning is raised
    #[structopt(long, default_value = "20")]
    pub low_battery: u8,

    /// UDP port devices listen for commands on
    #[structopt(long, default_value = "8889")]
    pub port: u16,

    /// Use simulated devices instead of the network
    #[structopt(long)]
    pub simulate: bool,

    /// Number of simulated devices offered by scans
    #[structopt(long, default_value = "3")]
    pub sim_devices: usize,
}

/// Runtime configuration of the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind: SocketAddr,
    pub network: Ipv4Net,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub telemetry_timeout: Duration,
    /// `None` disables background sampling
    pub sample_interval: Option<Duration>,
    pub low_battery_percent: u8,
    pub command_port: u16,
    /// Number of simulated devices; `None` uses real UDP transport
    pub simulated_devices: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 8000)),
            network: DEFAULT_NETWORK,
            command_timeout: Duration::from_millis(timing::COMMAND_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            telemetry_timeout: Duration::from_millis(timing::TELEMETRY_TIMEOUT_MS),
            sample_interval: Some(Duration::from_millis(timing::SAMPLE_INTERVAL_MS)),
            low_battery_percent: timing::BATTERY_LOW_PERCENT,
            command_port: timing::COMMAND_PORT,
            simulated_devices: None,
        }
    }
}

impl From<Options> for CoordinatorConfig {
    fn from(opts: Options) -> Self {
        Self {
            bind: opts.bind,
            network: opts.network,
            command_timeout: Duration::from_millis(opts.command_timeout_ms),
            connect_timeout: Duration::from_millis(opts.connect_timeout_ms),
            telemetry_timeout: Duration::from_millis(opts.telemetry_timeout_ms),
            sample_interval: match opts.sample_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            low_battery_percent: opts.low_battery.min(100),
            command_port: opts.port,
            simulated_devices: opts.simulate.then_some(opts.sim_devices),
        }
    }
}

impl CoordinatorConfig {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            command_timeout: self.command_timeout,
            connect_timeout: self.connect_timeout,
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: self
                .sample_interval
                .unwrap_or(Duration::from_millis(timing::SAMPLE_INTERVAL_MS)),
            telemetry_timeout: self.telemetry_timeout,
            battery_low_percent: self.low_battery_percent,
        }
    }

    /// Addresses handed out by scans in simulation mode
    pub fn simulated_addresses(&self) -> Vec<DeviceAddress> {
        let count = self.simulated_devices.unwrap_or(0);
        self.network
            .hosts()
            .take(count)
            .map(|host| DeviceAddress::from(std::net::IpAddr::V4(host)))
            .collect()
    }
}
