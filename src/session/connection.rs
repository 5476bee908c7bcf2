//! Individual device session handling

use crate::transport::{TransportConnector, TransportLink};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use swarm_shared::state_machine::{SessionEvent, SessionStateMachine, TransitionResult};
use swarm_shared::{
    Ack, Command, ConnectError, ConnectionState, DeviceAddress, FlightStatus, SendError, Telemetry,
};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared handle to a registered session
pub type SessionHandle = Arc<DeviceSession>;

/// Point-in-time view of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub address: DeviceAddress,
    pub state: ConnectionState,
    pub flight: FlightStatus,
    pub last_telemetry: Option<Telemetry>,
    pub fault_reason: Option<String>,
    pub connected_for_ms: Option<u64>,
}

struct SessionState {
    fsm: SessionStateMachine,
    flight: FlightStatus,
    last_telemetry: Option<Telemetry>,
    connected_at: Option<Instant>,
}

/// Coordinator-side state and link for one physical device
///
/// All state changes go through this type's own methods. Commands are
/// strictly serialized: a second `send` does not reach the transport until
/// the first has settled.
pub struct DeviceSession {
    address: DeviceAddress,
    connector: Arc<dyn TransportConnector>,
    state: RwLock<SessionState>,
    link: RwLock<Option<Arc<dyn TransportLink>>>,
    /// Held for the whole of each command exchange
    command_lock: Mutex<()>,
    /// Cancelled (and replaced) on disconnect
    cancel: Mutex<CancellationToken>,
}

impl DeviceSession {
    /// Create a disconnected session for `address`
    pub fn new(address: DeviceAddress, connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            address,
            connector,
            state: RwLock::new(SessionState {
                fsm: SessionStateMachine::new(),
                flight: FlightStatus::Grounded,
                last_telemetry: None,
                connected_at: None,
            }),
            link: RwLock::new(None),
            command_lock: Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.fsm.state()
    }

    pub async fn flight_status(&self) -> FlightStatus {
        self.state.read().await.flight
    }

    pub async fn last_telemetry(&self) -> Option<Telemetry> {
        self.state.read().await.last_telemetry
    }

    pub async fn info(&self) -> SessionInfo {
        let state = self.state.read().await;
        SessionInfo {
            address: self.address.clone(),
            state: state.fsm.state(),
            flight: state.flight,
            last_telemetry: state.last_telemetry,
            fault_reason: state.fsm.fault_reason().map(str::to_string),
            connected_for_ms: state
                .connected_at
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Perform the transport handshake, bounded by `timeout`
    pub async fn connect(&self, timeout: Duration) -> Result<(), ConnectError> {
        match self.transition(SessionEvent::ConnectRequested).await {
            TransitionResult::Success(_) => {}
            TransitionResult::Invalid {
                from: ConnectionState::Connected,
                ..
            } => return Ok(()),
            TransitionResult::Invalid { from, .. } => return Err(ConnectError::InvalidState(from)),
        }

        let cancel = self.cancel_token().await;
        let attempt = tokio::select! {
            _ = cancel.cancelled() => Err(ConnectError::Cancelled),
            result = tokio::time::timeout(timeout, self.connector.connect(&self.address)) => {
                result.unwrap_or_else(|_| {
                    Err(ConnectError::Unreachable(format!(
                        "no handshake within {}ms",
                        timeout.as_millis()
                    )))
                })
            }
        };

        match attempt {
            Ok(link) => {
                let link: Arc<dyn TransportLink> = Arc::from(link);
                *self.link.write().await = Some(link.clone());

                let mut state = self.state.write().await;
                let handshake = state.fsm.process_event(SessionEvent::HandshakeComplete);
                match handshake {
                    TransitionResult::Success(_) => {
                        state.connected_at = Some(Instant::now());
                        info!(
                            "[{}] Connected via {}",
                            self.address,
                            self.connector.name()
                        );
                        Ok(())
                    }
                    TransitionResult::Invalid { from, .. } => {
                        // Released while the handshake was in flight
                        drop(state);
                        debug!("[{}] Handshake finished in state {}", self.address, from);
                        self.release_link().await;
                        Err(ConnectError::Cancelled)
                    }
                }
            }
            Err(ConnectError::Cancelled) => Err(ConnectError::Cancelled),
            Err(err) => {
                warn!("[{}] Connect failed: {}", self.address, err);
                self.transition(SessionEvent::CommunicationFailed {
                    reason: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    /// Deliver one command, bounded by `timeout`
    ///
    /// Commands queue behind any earlier one to the same device; the bound
    /// starts once this command owns the link. Timeouts and transport faults
    /// leave the session Faulted.
    pub async fn send(&self, command: &Command, timeout: Duration) -> Result<Ack, SendError> {
        let cancel = self.cancel_token().await;

        let exchange = async {
            let _guard = self.command_lock.lock().await;
            let link = self.ready_link().await?;
            tokio::time::timeout(timeout, self.deliver(link.as_ref(), command))
                .await
                .unwrap_or(Err(SendError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }))
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SendError::Cancelled),
            outcome = exchange => outcome,
        };

        match &result {
            Ok(ack) => {
                debug!("[{}] {} acknowledged: {}", self.address, command, ack.response);
                self.record_flight(command).await;
            }
            Err(err @ (SendError::Timeout { .. } | SendError::TransportFault(_))) => {
                self.fault(err).await;
            }
            Err(err) => debug!("[{}] {} not delivered: {}", self.address, command, err),
        }

        result
    }

    /// Read a fresh telemetry snapshot, bounded by `timeout`
    ///
    /// Runs alongside command delivery only when the link supports
    /// interleaving. Otherwise it waits up to `timeout` for an in-flight
    /// command and gives up with `Busy`, leaving the session untouched.
    pub async fn sample_telemetry(&self, timeout: Duration) -> Result<Telemetry, SendError> {
        let cancel = self.cancel_token().await;

        let exchange = async {
            let link = self.ready_link().await?;
            let _guard = if link.supports_interleaving() {
                None
            } else {
                let guard = tokio::time::timeout(timeout, self.command_lock.lock())
                    .await
                    .map_err(|_| SendError::Busy {
                        waited_ms: timeout.as_millis() as u64,
                    })?;
                self.ensure_connected().await?;
                Some(guard)
            };
            tokio::time::timeout(timeout, link.receive_telemetry())
                .await
                .unwrap_or(Err(SendError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }))
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SendError::Cancelled),
            outcome = exchange => outcome,
        };

        match &result {
            Ok(telemetry) => {
                self.state.write().await.last_telemetry = Some(*telemetry);
            }
            Err(err @ (SendError::Timeout { .. } | SendError::TransportFault(_))) => {
                self.fault(err).await;
            }
            Err(err) => debug!("[{}] Telemetry skipped: {}", self.address, err),
        }

        result
    }

    /// Cancel in-flight work and release the transport handle
    ///
    /// Safe to call in any state, including Faulted.
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.cancel.lock().await, CancellationToken::new());
        previous.cancel();

        self.release_link().await;
        self.transition(SessionEvent::Released).await;
    }

    async fn deliver(&self, link: &dyn TransportLink, command: &Command) -> Result<Ack, SendError> {
        match command {
            Command::End => self.end_flight(link).await,
            _ if !link.supports(command) => Err(SendError::Unsupported(command.to_string())),
            _ => link.send(command).await,
        }
    }

    /// Land if airborne, then let go of the device
    async fn end_flight(&self, link: &dyn TransportLink) -> Result<Ack, SendError> {
        let started = Instant::now();
        if self.flight_status().await == FlightStatus::Airborne {
            link.send(&Command::Land).await?;
            self.state.write().await.flight = FlightStatus::Grounded;
        }

        self.release_link().await;
        self.transition(SessionEvent::Released).await;
        Ok(Ack::new("ended", started.elapsed().as_millis() as u64))
    }

    async fn record_flight(&self, command: &Command) {
        let flight = match command {
            Command::Takeoff => FlightStatus::Airborne,
            Command::Land | Command::End => FlightStatus::Grounded,
            _ => return,
        };
        self.state.write().await.flight = flight;
    }

    async fn fault(&self, err: &SendError) {
        warn!("[{}] Communication error: {}", self.address, err);
        self.transition(SessionEvent::CommunicationFailed {
            reason: err.to_string(),
        })
        .await;
    }

    async fn ensure_connected(&self) -> Result<(), SendError> {
        match self.state().await {
            ConnectionState::Connected => Ok(()),
            other => Err(SendError::InvalidState(other)),
        }
    }

    async fn ready_link(&self) -> Result<Arc<dyn TransportLink>, SendError> {
        self.ensure_connected().await?;
        self.link
            .read()
            .await
            .clone()
            .ok_or(SendError::InvalidState(ConnectionState::Disconnected))
    }

    async fn release_link(&self) {
        let link = self.link.write().await.take();
        if let Some(link) = link {
            if let Err(e) = link.shutdown().await {
                warn!("[{}] Transport shutdown failed: {}", self.address, e);
            }
        }
    }

    async fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().await.clone()
    }

    async fn transition(&self, event: SessionEvent) -> TransitionResult {
        let mut state = self.state.write().await;
        let from = state.fsm.state();
        let result = state.fsm.process_event(event);

        if let TransitionResult::Success(to) = &result {
            if *to != from {
                info!("[{}] {} -> {}", self.address, from, to);
            }
            if *to != ConnectionState::Connected {
                state.connected_at = None;
            }
        }

        result
    }
}
