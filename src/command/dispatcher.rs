//! Command dispatcher for fanning commands out to the swarm

use super::fanout::{admit, fan_out, record_missing};
use crate::session::{SessionHandle, SwarmRegistry};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarm_shared::{
    codec, timing, Ack, Command, ConnectionState, DeviceAddress, DispatchError, DuplicateError,
    FailureReason, Outcome, SkipReason, SwarmResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time bounds applied to each per-device operation
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(timing::COMMAND_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
        }
    }
}

/// Fans commands out to registered sessions and aggregates the outcomes
pub struct CommandDispatcher {
    registry: Arc<SwarmRegistry>,
    config: DispatcherConfig,
    dispatch_id: AtomicU64,
}

impl CommandDispatcher {
    /// Create a new command dispatcher
    pub fn new(registry: Arc<SwarmRegistry>, config: DispatcherConfig) -> Self {
        Self {
            registry,
            config,
            dispatch_id: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<SwarmRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn next_dispatch_id(&self) -> u64 {
        self.dispatch_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register and connect every address, proceeding with whatever subset is reachable
    pub async fn connect(
        &self,
        addresses: Vec<DeviceAddress>,
    ) -> Result<SwarmResult<()>, DispatchError> {
        let addresses = dedup(addresses);
        if addresses.is_empty() {
            return Err(DispatchError::EmptyTargets);
        }

        let mut result = SwarmResult::new();
        let mut sessions: Vec<SessionHandle> = Vec::with_capacity(addresses.len());

        for address in addresses {
            match self.register(address.clone()).await {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    debug!("{}", err);
                    result.record(address, Outcome::Failed(FailureReason::DuplicateRegistration));
                }
            }
        }

        let timeout = self.config.connect_timeout;
        let outcomes = fan_out(sessions, &CancellationToken::new(), |session| async move {
            let outcome: Outcome<()> = session.connect(timeout).await.into();
            outcome
        })
        .await;

        for (address, outcome) in outcomes {
            result.record(address, outcome);
        }

        info!(
            "Connect: {}/{} devices connected",
            result.success_count(),
            result.len()
        );
        Ok(result)
    }

    /// Send `command` to `targets` (every registered session when `None`)
    pub async fn execute(
        &self,
        command: Command,
        targets: Option<Vec<DeviceAddress>>,
    ) -> Result<SwarmResult<Ack>, DispatchError> {
        self.execute_cancellable(command, targets, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), settling pending devices as
    /// `Failed(Cancelled)` once `cancel` fires
    pub async fn execute_cancellable(
        &self,
        command: Command,
        targets: Option<Vec<DeviceAddress>>,
        cancel: &CancellationToken,
    ) -> Result<SwarmResult<Ack>, DispatchError> {
        codec::validate(&command)?;
        let targets = self.targets(targets).await?;
        let dispatch_id = self.next_dispatch_id();

        debug!(
            ">>> Dispatch #{}: {} to {} devices",
            dispatch_id,
            command,
            targets.len()
        );

        let resolution = self.registry.resolve(targets.iter().cloned()).await;
        let mut result = SwarmResult::new();
        record_missing(resolution.missing, &mut result);

        let ready = admit(resolution.found, &mut result, |state| {
            command.precondition_met(state)
        })
        .await;

        let timeout = self.config.command_timeout;
        let outcomes = fan_out(ready, cancel, |session| async move {
            let outcome: Outcome<Ack> = session.send(&command, timeout).await.into();
            outcome
        })
        .await;

        for (address, outcome) in outcomes {
            if let Outcome::Failed(reason) = &outcome {
                warn!("[{}] {} failed: {:?}", address, command, reason);
            }
            result.record(address, outcome);
        }

        debug_assert!(result.covers(&targets));
        info!(
            "<<< Dispatch #{} {}: {} ok, {} failed, {} skipped",
            dispatch_id,
            command,
            result.success_count(),
            result.failed_count(),
            result.skipped_count()
        );

        Ok(result)
    }

    /// Release and unregister `targets` (every registered session when `None`)
    pub async fn disconnect(
        &self,
        targets: Option<Vec<DeviceAddress>>,
    ) -> Result<SwarmResult<()>, DispatchError> {
        let targets = match targets {
            Some(targets) => {
                let targets = dedup(targets);
                if targets.is_empty() {
                    return Err(DispatchError::EmptyTargets);
                }
                targets
            }
            None => self.registry.addresses().await,
        };

        let removals = join_all(targets.into_iter().map(|address| async move {
            let outcome = match self.registry.remove(&address).await {
                Some(_) => Outcome::Success(()),
                None => Outcome::Skipped(SkipReason::NotRegistered),
            };
            (address, outcome)
        }))
        .await;

        let mut result = SwarmResult::new();
        for (address, outcome) in removals {
            result.record(address, outcome);
        }

        info!("Disconnect: {} sessions released", result.success_count());
        Ok(result)
    }

    /// Add a session for `address`, reusing one that was released in place
    async fn register(&self, address: DeviceAddress) -> Result<SessionHandle, DuplicateError> {
        match self.registry.add(address.clone()).await {
            // Ended sessions stay registered until removed
            Err(err) if err.state == ConnectionState::Disconnected => {
                match self.registry.get(&address).await {
                    Some(session) => Ok(session),
                    None => self.registry.add(address).await,
                }
            }
            other => other,
        }
    }

    async fn targets(
        &self,
        targets: Option<Vec<DeviceAddress>>,
    ) -> Result<Vec<DeviceAddress>, DispatchError> {
        match targets {
            Some(targets) => {
                let targets = dedup(targets);
                if targets.is_empty() {
                    Err(DispatchError::EmptyTargets)
                } else {
                    Ok(targets)
                }
            }
            None => {
                let all = self.registry.addresses().await;
                if all.is_empty() {
                    Err(DispatchError::EmptySwarm)
                } else {
                    Ok(all)
                }
            }
        }
    }
}

/// Drop repeated addresses, keeping first-seen order
pub(crate) fn dedup(addresses: Vec<DeviceAddress>) -> Vec<DeviceAddress> {
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SimConnector, SimProfile};
    use swarm_shared::{ConnectionState, MoveDirection};
    use tokio::time::Instant;

    fn addr(s: &str) -> DeviceAddress {
        DeviceAddress::from(s)
    }

    fn dispatcher(connector: SimConnector) -> CommandDispatcher {
        let registry = Arc::new(SwarmRegistry::new(Arc::new(connector)));
        CommandDispatcher::new(
            registry,
            DispatcherConfig {
                command_timeout: Duration::from_millis(500),
                connect_timeout: Duration::from_millis(500),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_connect_then_swarm_command() {
        let connector = SimConnector::new().with_profile("B", SimProfile::unreachable());
        let dispatcher = dispatcher(connector);

        let connected = dispatcher
            .connect(vec![addr("A"), addr("B"), addr("C")])
            .await
            .unwrap();
        assert_eq!(connected.get(&addr("A")), Some(&Outcome::Success(())));
        assert_eq!(
            connected.get(&addr("B")),
            Some(&Outcome::Failed(FailureReason::Unreachable))
        );
        assert_eq!(connected.get(&addr("C")), Some(&Outcome::Success(())));

        let result = dispatcher.execute(Command::Takeoff, None).await.unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.get(&addr("A")).unwrap().is_success());
        assert!(result.get(&addr("C")).unwrap().is_success());
        assert_eq!(
            result.get(&addr("B")),
            Some(&Outcome::Skipped(SkipReason::InvalidState(
                ConnectionState::Faulted
            )))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_keys_equal_targets() {
        let dispatcher = dispatcher(SimConnector::new());
        dispatcher.connect(vec![addr("A"), addr("B")]).await.unwrap();

        let targets = vec![addr("A"), addr("X"), addr("A")];
        let result = dispatcher
            .execute(Command::Stop, Some(targets))
            .await
            .unwrap();

        assert!(result.covers(&[addr("A"), addr("X")]));
        assert_eq!(
            result.get(&addr("X")),
            Some(&Outcome::Skipped(SkipReason::NotRegistered))
        );
        assert!(!result.contains(&addr("B")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_device_does_not_delay_siblings() {
        let connector = SimConnector::new()
            .with_default_profile(SimProfile::slow(Duration::from_millis(20)))
            .with_profile("slow", SimProfile::slow(Duration::from_secs(30)));
        let log = connector.log();
        let dispatcher = dispatcher(connector);
        dispatcher
            .connect(vec![addr("A"), addr("B"), addr("slow")])
            .await
            .unwrap();

        let started = Instant::now();
        let result = dispatcher.execute(Command::Takeoff, None).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(
            result.get(&addr("slow")),
            Some(&Outcome::Failed(FailureReason::Timeout))
        );
        assert!(result.get(&addr("A")).unwrap().is_success());
        assert!(result.get(&addr("B")).unwrap().is_success());

        // Whole call is bounded by the per-command timeout
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(600));

        // Fast devices finished on their own schedule
        for fast in ["A", "B"] {
            let events = log.events_for(&addr(fast));
            assert_eq!(events.len(), 1);
            assert!(events[0].finished.duration_since(started) < Duration::from_millis(100));
        }

        let session = dispatcher.registry().get(&addr("slow")).await.unwrap();
        assert_eq!(session.state().await, ConnectionState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_device_does_not_affect_others() {
        let connector = SimConnector::new().with_profile(
            "broken",
            SimProfile {
                fail_commands: true,
                ..Default::default()
            },
        );
        let dispatcher = dispatcher(connector);
        dispatcher
            .connect(vec![addr("A"), addr("broken")])
            .await
            .unwrap();

        let result = dispatcher.execute(Command::Takeoff, None).await.unwrap();
        assert!(result.get(&addr("A")).unwrap().is_success());
        assert!(matches!(
            result.get(&addr("broken")),
            Some(Outcome::Failed(FailureReason::TransportFault(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_errors() {
        let dispatcher = dispatcher(SimConnector::new());

        assert_eq!(
            dispatcher.execute(Command::Takeoff, None).await.err(),
            Some(DispatchError::EmptySwarm)
        );
        assert_eq!(
            dispatcher.execute(Command::Takeoff, Some(vec![])).await.err(),
            Some(DispatchError::EmptyTargets)
        );
        assert_eq!(dispatcher.connect(vec![]).await.err(), Some(DispatchError::EmptyTargets));

        let too_far = Command::Move {
            direction: MoveDirection::Forward,
            distance_cm: 9000,
        };
        assert!(matches!(
            dispatcher.execute(too_far, Some(vec![addr("A")])).await,
            Err(DispatchError::MalformedCommand(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_settles_pending_devices() {
        let connector =
            SimConnector::new().with_default_profile(SimProfile::slow(Duration::from_millis(400)));
        let dispatcher = dispatcher(connector);
        dispatcher.connect(vec![addr("A"), addr("B")]).await.unwrap();

        let cancel = CancellationToken::new();
        let (result, _) = tokio::join!(
            dispatcher.execute_cancellable(Command::Takeoff, None, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            }
        );

        let result = result.unwrap();
        assert_eq!(result.len(), 2);
        for (_, outcome) in result.iter() {
            assert_eq!(outcome, &Outcome::Failed(FailureReason::Cancelled));
        }

        // Aborting the swarm command is not a device fault
        let session = dispatcher.registry().get(&addr("A")).await.unwrap();
        assert_eq!(session.state().await, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_connect_is_reported() {
        let dispatcher = dispatcher(SimConnector::new());
        dispatcher.connect(vec![addr("A")]).await.unwrap();

        let again = dispatcher.connect(vec![addr("A"), addr("B")]).await.unwrap();
        assert_eq!(
            again.get(&addr("A")),
            Some(&Outcome::Failed(FailureReason::DuplicateRegistration))
        );
        assert_eq!(again.get(&addr("B")), Some(&Outcome::Success(())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_targets() {
        let dispatcher = dispatcher(SimConnector::new());
        dispatcher.connect(vec![addr("A"), addr("B")]).await.unwrap();

        let result = dispatcher
            .disconnect(Some(vec![addr("A"), addr("X")]))
            .await
            .unwrap();
        assert_eq!(result.get(&addr("A")), Some(&Outcome::Success(())));
        assert_eq!(
            result.get(&addr("X")),
            Some(&Outcome::Skipped(SkipReason::NotRegistered))
        );
        assert_eq!(dispatcher.registry().addresses().await, vec![addr("B")]);

        let rest = dispatcher.disconnect(None).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(dispatcher.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_disconnect() {
        let dispatcher = dispatcher(SimConnector::new());
        dispatcher.connect(vec![addr("A")]).await.unwrap();
        dispatcher.disconnect(None).await.unwrap();

        let again = dispatcher.connect(vec![addr("A")]).await.unwrap();
        assert!(again.all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_end() {
        let dispatcher = dispatcher(SimConnector::new());
        dispatcher.connect(vec![addr("A")]).await.unwrap();

        let ended = dispatcher.execute(Command::End, None).await.unwrap();
        assert!(ended.all_succeeded());
        let session = dispatcher.registry().get(&addr("A")).await.unwrap();
        assert_eq!(session.state().await, ConnectionState::Disconnected);

        let again = dispatcher.connect(vec![addr("A")]).await.unwrap();
        assert_eq!(again.get(&addr("A")), Some(&Outcome::Success(())));
        assert_eq!(dispatcher.registry().count().await, 1);

        let result = dispatcher.execute(Command::Takeoff, None).await.unwrap();
        assert!(result.all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_commands_to_one_device_both_succeed() {
        let connector =
            SimConnector::new().with_default_profile(SimProfile::slow(Duration::from_millis(400)));
        let dispatcher = dispatcher(connector);
        dispatcher.connect(vec![addr("A")]).await.unwrap();

        let (first, second) = tokio::join!(
            dispatcher.execute(Command::Takeoff, None),
            dispatcher.execute(Command::Stop, None)
        );

        assert!(first.unwrap().all_succeeded());
        assert!(second.unwrap().all_succeeded());
        let session = dispatcher.registry().get(&addr("A")).await.unwrap();
        assert_eq!(session.state().await, ConnectionState::Connected);
    }

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let deduped = dedup(vec![addr("b"), addr("a"), addr("b")]);
        assert_eq!(deduped, vec![addr("b"), addr("a")]);
    }
}
