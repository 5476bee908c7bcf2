use std::sync::Arc;
use structopt::StructOpt;
use swarm_coordinator::discovery::{Discovery, ProbeConfig, ProbeDiscovery, StaticDiscovery};
use swarm_coordinator::transport::{SimConnector, TransportConnector, UdpConnector};
use swarm_coordinator::{api, Coordinator, CoordinatorConfig, HealthEvent, Options};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = CoordinatorConfig::from(Options::from_args());

    let (connector, discovery): (Arc<dyn TransportConnector>, Box<dyn Discovery>) =
        match config.simulated_devices {
            Some(count) => {
                info!("Simulation mode: {} devices", count);
                (
                    Arc::new(SimConnector::new()),
                    Box::new(StaticDiscovery::new(config.simulated_addresses())),
                )
            }
            None => {
                let udp: Arc<dyn TransportConnector> =
                    Arc::new(UdpConnector::new(config.command_port));
                let probe = ProbeDiscovery::new(udp.clone(), ProbeConfig::default());
                (udp, Box::new(probe))
            }
        };

    info!("Swarm coordinator starting");
    info!("  Transport: {}", connector.name());
    info!("  Network: {}", config.network);
    info!(
        "  Command timeout: {}ms",
        config.command_timeout.as_millis()
    );

    let coordinator = Arc::new(Coordinator::new(connector, discovery, &config));

    // Spawn health event logger
    let events = coordinator.sampler().subscribe();
    tokio::spawn(async move {
        handle_health_events(events).await;
    });

    let sampler = config
        .sample_interval
        .map(|_| coordinator.sampler().start());

    let (addr, server) = warp::serve(api::routes(coordinator.clone()))
        .try_bind_with_graceful_shutdown(config.bind, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        })?;

    info!("Listening on http://{}", addr);
    server.await;

    info!("Shutting down...");
    if let Some(handle) = sampler {
        handle.stop().await;
    }
    coordinator.shutdown().await;

    Ok(())
}

/// Log health events raised by the sampler
async fn handle_health_events(mut events: broadcast::Receiver<HealthEvent>) {
    loop {
        match events.recv().await {
            Ok(HealthEvent::BatteryLow { address, percent }) => {
                warn!("[{}] Battery low ({}%), consider landing", address, percent);
            }
            Ok(HealthEvent::SampleFailed { address, reason }) => {
                warn!("[{}] Telemetry unavailable: {:?}", address, reason);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Health event logger lagged, {} events dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
