//! Routing state machine.
//!
//! A turn walks `Idle -> Classifying -> Dispatching -> [Awaiting(n) ->
//! (Dispatching -> Awaiting(n))*] -> Composing -> Idle | Escalated`.
//! Any open state may move to `Closed`.

use tracing::debug;

use aftercare_core::types::{RoutingState, SessionId};

use crate::error::SupportError;

/// Validate that a routing transition is allowed.
///
/// `Awaiting` compares by variant; the outstanding count is informational.
pub fn validate_transition(from: RoutingState, to: RoutingState) -> Result<(), SupportError> {
    use RoutingState::*;

    let valid = matches!(
        (from, to),
        (Idle, Classifying)
            | (Classifying, Dispatching)
            | (Dispatching, Awaiting { .. })
            | (Dispatching, Composing)
            | (Awaiting { .. }, Dispatching)
            | (Awaiting { .. }, Composing)
            | (Composing, Escalated)
            | (Composing, Idle)
    ) || (to == Closed && from != Closed);

    if valid {
        Ok(())
    } else {
        Err(SupportError::InvalidTransition { from, to })
    }
}

/// Tracks the routing state of one in-flight turn.
#[derive(Debug)]
pub struct TurnMachine {
    session_id: SessionId,
    state: RoutingState,
    history: Vec<RoutingState>,
}

impl TurnMachine {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: RoutingState::Idle,
            history: vec![RoutingState::Idle],
        }
    }

    pub fn state(&self) -> RoutingState {
        self.state
    }

    /// States visited so far, in order.
    pub fn history(&self) -> &[RoutingState] {
        &self.history
    }

    pub fn advance(&mut self, to: RoutingState) -> Result<(), SupportError> {
        validate_transition(self.state, to)?;
        debug!(session_id = %self.session_id, from = %self.state, to = %to, "Routing transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use RoutingState::*;

    const ALL: [RoutingState; 7] = [
        Idle,
        Classifying,
        Dispatching,
        Awaiting { outstanding: 2 },
        Composing,
        Escalated,
        Closed,
    ];

    // =====================================================================
    // Valid transitions
    // =====================================================================

    #[test]
    fn test_idle_to_classifying() {
        assert!(validate_transition(Idle, Classifying).is_ok());
    }

    #[test]
    fn test_classifying_to_dispatching() {
        assert!(validate_transition(Classifying, Dispatching).is_ok());
    }

    #[test]
    fn test_dispatching_to_awaiting() {
        assert!(validate_transition(Dispatching, Awaiting { outstanding: 3 }).is_ok());
    }

    #[test]
    fn test_awaiting_to_composing() {
        assert!(validate_transition(Awaiting { outstanding: 1 }, Composing).is_ok());
    }

    #[test]
    fn test_awaiting_to_dispatching_for_next_stage() {
        assert!(validate_transition(Awaiting { outstanding: 1 }, Dispatching).is_ok());
    }

    #[test]
    fn test_dispatching_to_composing_without_calls() {
        assert!(validate_transition(Dispatching, Composing).is_ok());
    }

    #[test]
    fn test_composing_outcomes() {
        assert!(validate_transition(Composing, Escalated).is_ok());
        assert!(validate_transition(Composing, Idle).is_ok());
    }

    #[test]
    fn test_any_open_state_to_closed() {
        for from in ALL.iter().copied().filter(|s| *s != Closed) {
            assert!(validate_transition(from, Closed).is_ok(), "{} -> closed", from);
        }
    }

    // =====================================================================
    // Invalid transitions
    // =====================================================================

    #[test]
    fn test_closed_is_terminal() {
        for to in ALL {
            assert!(validate_transition(Closed, to).is_err(), "closed -> {}", to);
        }
    }

    #[test]
    fn test_escalated_only_closes() {
        for to in ALL.iter().copied().filter(|s| *s != Closed) {
            assert!(validate_transition(Escalated, to).is_err(), "escalated -> {}", to);
        }
    }

    #[test]
    fn test_skipping_classification_invalid() {
        assert!(validate_transition(Idle, Dispatching).is_err());
        assert!(validate_transition(Idle, Composing).is_err());
        assert!(validate_transition(Classifying, Composing).is_err());
    }

    #[test]
    fn test_self_transitions_invalid() {
        for state in [Idle, Classifying, Dispatching, Composing, Escalated] {
            assert!(validate_transition(state, state).is_err());
        }
    }

    #[test]
    fn test_idle_to_escalated_invalid() {
        assert!(validate_transition(Idle, Escalated).is_err());
    }

    #[test]
    fn test_turn_machine_records_history() {
        let mut machine = TurnMachine::new(Uuid::new_v4());
        machine.advance(Classifying).unwrap();
        machine.advance(Dispatching).unwrap();
        machine.advance(Awaiting { outstanding: 2 }).unwrap();
        machine.advance(Composing).unwrap();
        machine.advance(Idle).unwrap();
        assert_eq!(machine.history().len(), 6);
        assert_eq!(machine.state(), Idle);
    }

    #[test]
    fn test_turn_machine_rejects_invalid_step() {
        let mut machine = TurnMachine::new(Uuid::new_v4());
        let err = machine.advance(Composing).unwrap_err();
        assert!(matches!(err, SupportError::InvalidTransition { .. }));
        assert_eq!(machine.state(), Idle);
    }
}
