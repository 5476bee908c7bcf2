//! Session State Machine
//!
//! Defines the valid connection lifecycle transitions of a device session.
//! Sessions start Disconnected, move through Connecting to Connected, and
//! fall into Faulted on any communication error. A Faulted session stays
//! Faulted until it is released.

use crate::ConnectionState;

/// Events that can trigger session state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport handshake started
    ConnectRequested,
    /// Transport handshake completed
    HandshakeComplete,
    /// Handshake, command or telemetry exchange failed
    CommunicationFailed { reason: String },
    /// Transport handle released
    Released,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed the same)
    Success(ConnectionState),
    /// Transition was invalid from the current state
    Invalid {
        from: ConnectionState,
        event: SessionEvent,
    },
}

/// Connection lifecycle tracker owned by one session
#[derive(Debug)]
pub struct SessionStateMachine {
    current_state: ConnectionState,
    fault_reason: Option<String>,
    fault_count: u32,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// Create a new state machine in the Disconnected state
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
            fault_reason: None,
            fault_count: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Reason recorded by the most recent fault, if still Faulted
    pub fn fault_reason(&self) -> Option<&str> {
        self.fault_reason.as_deref()
    }

    pub fn fault_count(&self) -> u32 {
        self.fault_count
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        match self.next_state(&event) {
            Some(state) => {
                if let SessionEvent::CommunicationFailed { reason } = &event {
                    self.fault_reason = Some(reason.clone());
                    self.fault_count += 1;
                } else {
                    self.fault_reason = None;
                }
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn next_state(&self, event: &SessionEvent) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (self.current_state, event) {
            (Disconnected, SessionEvent::ConnectRequested) => Some(Connecting),
            (Connecting, SessionEvent::HandshakeComplete) => Some(Connected),

            // Faulted is reachable from every non-terminal state and absorbs further errors
            (Connecting | Connected | Faulted, SessionEvent::CommunicationFailed { .. }) => {
                Some(Faulted)
            }

            // Releasing the transport is always allowed
            (_, SessionEvent::Released) => Some(Disconnected),

            _ => None,
        }
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (_, Disconnected) => true,
        (Disconnected, Connecting) => true,
        (Connecting, Connected) => true,
        (Connecting | Connected, Faulted) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(reason: &str) -> SessionEvent {
        SessionEvent::CommunicationFailed {
            reason: reason.into(),
        }
    }

    #[test]
    fn test_initial_state() {
        let fsm = SessionStateMachine::new();
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
        assert_eq!(fsm.fault_reason(), None);
    }

    #[test]
    fn test_normal_lifecycle() {
        let mut fsm = SessionStateMachine::new();

        let result = fsm.process_event(SessionEvent::ConnectRequested);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connecting));

        let result = fsm.process_event(SessionEvent::HandshakeComplete);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connected));

        let result = fsm.process_event(SessionEvent::Released);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));
    }

    #[test]
    fn test_fault_from_connected_records_reason() {
        let mut fsm = SessionStateMachine::new();
        fsm.process_event(SessionEvent::ConnectRequested);
        fsm.process_event(SessionEvent::HandshakeComplete);

        let result = fsm.process_event(failed("timeout"));
        assert_eq!(result, TransitionResult::Success(ConnectionState::Faulted));
        assert_eq!(fsm.fault_reason(), Some("timeout"));
        assert_eq!(fsm.fault_count(), 1);
    }

    #[test]
    fn test_fault_during_handshake() {
        let mut fsm = SessionStateMachine::new();
        fsm.process_event(SessionEvent::ConnectRequested);

        let result = fsm.process_event(failed("unreachable"));
        assert_eq!(result, TransitionResult::Success(ConnectionState::Faulted));
    }

    #[test]
    fn test_faulted_cannot_reconnect() {
        let mut fsm = SessionStateMachine::new();
        fsm.process_event(SessionEvent::ConnectRequested);
        fsm.process_event(failed("unreachable"));

        let result = fsm.process_event(SessionEvent::ConnectRequested);
        assert!(matches!(
            result,
            TransitionResult::Invalid {
                from: ConnectionState::Faulted,
                ..
            }
        ));
        assert_eq!(fsm.state(), ConnectionState::Faulted);
    }

    #[test]
    fn test_release_clears_fault() {
        let mut fsm = SessionStateMachine::new();
        fsm.process_event(SessionEvent::ConnectRequested);
        fsm.process_event(failed("unreachable"));
        fsm.process_event(SessionEvent::Released);

        assert_eq!(fsm.state(), ConnectionState::Disconnected);
        assert_eq!(fsm.fault_reason(), None);
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = SessionStateMachine::new();

        // Can't complete a handshake that never started
        let result = fsm.process_event(SessionEvent::HandshakeComplete);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::Disconnected);

        // Nothing to fault while disconnected
        let result = fsm.process_event(failed("late error"));
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }

    #[test]
    fn test_transition_table() {
        use ConnectionState::*;
        assert!(is_valid_transition(Disconnected, Connecting));
        assert!(is_valid_transition(Connected, Faulted));
        assert!(is_valid_transition(Faulted, Disconnected));
        assert!(!is_valid_transition(Faulted, Connected));
        assert!(!is_valid_transition(Disconnected, Connected));
    }
}
