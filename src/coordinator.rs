//! Wiring of registry, dispatcher, sampler and discovery into one service

use crate::command::CommandDispatcher;
use crate::config::CoordinatorConfig;
use crate::discovery::Discovery;
use crate::health::HealthSampler;
use crate::session::SwarmRegistry;
use crate::transport::TransportConnector;
use anyhow::Result;
use ipnet::Ipv4Net;
use std::sync::Arc;
use swarm_shared::DeviceAddress;
use tracing::info;

/// Everything a caller needs to drive the swarm
pub struct Coordinator {
    registry: Arc<SwarmRegistry>,
    dispatcher: CommandDispatcher,
    sampler: Arc<HealthSampler>,
    discovery: Box<dyn Discovery>,
    network: Ipv4Net,
}

impl Coordinator {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        discovery: Box<dyn Discovery>,
        config: &CoordinatorConfig,
    ) -> Self {
        let registry = Arc::new(SwarmRegistry::new(connector));
        let dispatcher = CommandDispatcher::new(registry.clone(), config.dispatcher_config());
        let sampler = Arc::new(HealthSampler::new(registry.clone(), config.sampler_config()));

        Self {
            registry,
            dispatcher,
            sampler,
            discovery,
            network: config.network,
        }
    }

    pub fn registry(&self) -> &Arc<SwarmRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn sampler(&self) -> &Arc<HealthSampler> {
        &self.sampler
    }

    /// Look for devices on the configured network
    pub async fn scan(&self) -> Result<Vec<DeviceAddress>> {
        self.discovery.discover(&self.network).await
    }

    /// Release every session
    pub async fn shutdown(&self) -> usize {
        let released = self.registry.teardown().await;
        info!("Coordinator shut down, {} sessions released", released);
        released
    }
}
