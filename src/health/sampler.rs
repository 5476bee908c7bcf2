//! Health Sampler
//!
//! Refreshes telemetry for registered sessions, either on demand or on a
//! background cadence, using the same fan-out discipline as command
//! dispatch. A device tied up by a command for the whole telemetry timeout
//! is reported busy and left as it is.

use crate::command::dedup;
use crate::command::fanout::{admit, fan_out, record_missing};
use crate::session::SwarmRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use swarm_shared::{
    timing, ConnectionState, DeviceAddress, DispatchError, FailureReason, Outcome, SwarmResult,
    Telemetry,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sampling cadence and thresholds
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub interval: Duration,
    pub telemetry_timeout: Duration,
    pub battery_low_percent: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(timing::SAMPLE_INTERVAL_MS),
            telemetry_timeout: Duration::from_millis(timing::TELEMETRY_TIMEOUT_MS),
            battery_low_percent: timing::BATTERY_LOW_PERCENT,
        }
    }
}

/// Notable results published after each sampling round
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    BatteryLow { address: DeviceAddress, percent: u8 },
    SampleFailed { address: DeviceAddress, reason: FailureReason },
}

/// Polls telemetry for the swarm without holding up command dispatch
pub struct HealthSampler {
    registry: Arc<SwarmRegistry>,
    config: SamplerConfig,
    event_tx: broadcast::Sender<HealthEvent>,
}

impl HealthSampler {
    /// Create a new health sampler
    pub fn new(registry: Arc<SwarmRegistry>, config: SamplerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            registry,
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Receive health events from subsequent sampling rounds
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.event_tx.subscribe()
    }

    /// Sample every registered session
    pub async fn sample_all(&self) -> SwarmResult<Telemetry> {
        let targets = self.registry.addresses().await;
        self.sample_addresses(targets).await
    }

    /// Sample `targets` (every registered session when `None`)
    pub async fn sample(
        &self,
        targets: Option<Vec<DeviceAddress>>,
    ) -> Result<SwarmResult<Telemetry>, DispatchError> {
        let targets = match targets {
            Some(targets) => {
                let targets = dedup(targets);
                if targets.is_empty() {
                    return Err(DispatchError::EmptyTargets);
                }
                targets
            }
            None => {
                let all = self.registry.addresses().await;
                if all.is_empty() {
                    return Err(DispatchError::EmptySwarm);
                }
                all
            }
        };

        Ok(self.sample_addresses(targets).await)
    }

    /// Last telemetry seen per session, without touching the network
    pub async fn latest(&self) -> HashMap<DeviceAddress, Telemetry> {
        self.registry
            .describe()
            .await
            .into_iter()
            .filter_map(|info| info.last_telemetry.map(|t| (info.address, t)))
            .collect()
    }

    /// Start sampling on the configured cadence
    pub fn start(self: &Arc<Self>) -> SamplerHandle {
        let cancel = CancellationToken::new();
        let sampler = self.clone();
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(sampler.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let result = sampler.sample_all().await;
                        if !result.is_empty() {
                            debug!(
                                "[HEALTH] Sampled {} devices: {} ok, {} failed",
                                result.len(),
                                result.success_count(),
                                result.failed_count()
                            );
                        }
                    }
                }
            }

            info!("[HEALTH] Sampling stopped");
        });

        info!(
            "[HEALTH] Sampling every {}ms",
            self.config.interval.as_millis()
        );
        SamplerHandle { cancel, task }
    }

    async fn sample_addresses(&self, targets: Vec<DeviceAddress>) -> SwarmResult<Telemetry> {
        let resolution = self.registry.resolve(targets).await;
        let mut result = SwarmResult::new();
        record_missing(resolution.missing, &mut result);

        let ready = admit(resolution.found, &mut result, |state| {
            state == ConnectionState::Connected
        })
        .await;

        let timeout = self.config.telemetry_timeout;
        let outcomes = fan_out(ready, &CancellationToken::new(), |session| async move {
            let outcome: Outcome<Telemetry> = session.sample_telemetry(timeout).await.into();
            outcome
        })
        .await;

        for (address, outcome) in outcomes {
            self.publish(&address, &outcome);
            result.record(address, outcome);
        }

        result
    }

    fn publish(&self, address: &DeviceAddress, outcome: &Outcome<Telemetry>) {
        let event = match outcome {
            Outcome::Success(telemetry)
                if telemetry.is_battery_low(self.config.battery_low_percent) =>
            {
                warn!(
                    "[HEALTH] {} battery low: {}%",
                    address, telemetry.battery_percent
                );
                HealthEvent::BatteryLow {
                    address: address.clone(),
                    percent: telemetry.battery_percent,
                }
            }
            Outcome::Failed(reason) => {
                warn!("[HEALTH] {} telemetry failed: {:?}", address, reason);
                HealthEvent::SampleFailed {
                    address: address.clone(),
                    reason: reason.clone(),
                }
            }
            _ => return,
        };

        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Handle to stop background sampling
pub struct SamplerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Stop sampling and wait for the current round to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("[HEALTH] Sampler task ended abnormally: {}", e);
        }
    }
}
