//! Device discovery on the local network
//!
//! Candidates are identified by answering the control handshake, so only
//! hosts that actually speak the device protocol are returned.

use crate::transport::TransportConnector;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ipnet::Ipv4Net;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use swarm_shared::{timing, DeviceAddress};
use tokio::time::timeout;
use tracing::{debug, info};

/// Source of candidate device addresses
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, network: &Ipv4Net) -> Result<Vec<DeviceAddress>>;
}

/// Configuration for probe-based discovery
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// How long each host gets to answer the handshake
    pub probe_timeout: Duration,
    /// Maximum number of probes in flight
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(timing::PROBE_TIMEOUT_MS),
            concurrency: 64,
        }
    }
}

/// Handshake every host of a range and keep the ones that answer
pub struct ProbeDiscovery {
    connector: Arc<dyn TransportConnector>,
    config: ProbeConfig,
}

impl ProbeDiscovery {
    pub fn new(connector: Arc<dyn TransportConnector>, config: ProbeConfig) -> Self {
        Self { connector, config }
    }

    async fn probe(&self, host: Ipv4Addr) -> Option<DeviceAddress> {
        let address = DeviceAddress::from(IpAddr::V4(host));

        let link = match timeout(self.config.probe_timeout, self.connector.connect(&address)).await
        {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                debug!("Probe {}: {}", address, e);
                return None;
            }
            Err(_) => return None,
        };

        if let Err(e) = link.shutdown().await {
            debug!("Probe {}: release failed: {}", address, e);
        }
        Some(address)
    }
}

#[async_trait]
impl Discovery for ProbeDiscovery {
    async fn discover(&self, network: &Ipv4Net) -> Result<Vec<DeviceAddress>> {
        info!(
            "Scanning {} over {} ({} probes at a time)",
            network,
            self.connector.name(),
            self.config.concurrency
        );

        let mut found: Vec<(Ipv4Addr, DeviceAddress)> = stream::iter(network.hosts())
            .map(|host| async move { self.probe(host).await.map(|address| (host, address)) })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|hit| async move { hit })
            .collect()
            .await;

        found.sort_by_key(|(host, _)| *host);
        info!("Scan of {} found {} devices", network, found.len());

        Ok(found.into_iter().map(|(_, address)| address).collect())
    }
}

/// Fixed list of addresses, independent of the requested range
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    addresses: Vec<DeviceAddress>,
}

impl StaticDiscovery {
    pub fn new(addresses: Vec<DeviceAddress>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, _network: &Ipv4Net) -> Result<Vec<DeviceAddress>> {
        Ok(self.addresses.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SimConnector, SimHandshake, SimProfile};

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_keeps_only_handshaking_hosts() {
        let connector = SimConnector::new()
            .with_default_profile(SimProfile::unreachable())
            .with_profile("10.0.0.5", SimProfile::default())
            .with_profile("10.0.0.2", SimProfile::default())
            .with_profile(
                "10.0.0.3",
                SimProfile {
                    handshake: SimHandshake::ProtocolMismatch,
                    ..Default::default()
                },
            );
        let log = connector.log();
        let discovery = ProbeDiscovery::new(Arc::new(connector), ProbeConfig::default());

        let found = discovery.discover(&net("10.0.0.0/29")).await.unwrap();
        assert_eq!(
            found,
            vec![DeviceAddress::from("10.0.0.2"), DeviceAddress::from("10.0.0.5")]
        );
        // Probe links are released
        assert_eq!(log.shutdowns().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_drops_silent_hosts() {
        let connector = SimConnector::new().with_default_profile(SimProfile {
            connect_latency: Duration::from_secs(10),
            ..Default::default()
        });
        let discovery = ProbeDiscovery::new(
            Arc::new(connector),
            ProbeConfig {
                probe_timeout: Duration::from_millis(100),
                concurrency: 4,
            },
        );

        let found = discovery.discover(&net("10.0.0.0/30")).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_static_discovery() {
        let discovery = StaticDiscovery::new(vec![DeviceAddress::from("sim-1")]);
        let found = discovery.discover(&net("192.168.10.0/24")).await.unwrap();
        assert_eq!(found, vec![DeviceAddress::from("sim-1")]);
    }
}
