//! Call session value objects

use serde::{Deserialize, Serialize};

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// We sent the invite
    Outbound,
    /// We received the invite
    Inbound,
}

/// Call state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// Session created, no protocol exchange yet
    Idle,
    /// Outbound invite sent, waiting for the peer
    Dialing,
    /// Inbound invite received, local side is being alerted
    Ringing,
    /// Call accepted by both sides
    Established,
    /// Call finished
    Ended(EndReason),
}

impl CallState {
    /// Check if a state transition is valid
    pub fn can_transition_to(&self, new_state: &CallState) -> bool {
        use CallState::*;

        match (self, new_state) {
            // From Idle: outbound attempt or inbound alerting
            (Idle, Dialing) => true,
            (Idle, Ringing) => true,

            // From Dialing
            (Dialing, Established) => true,
            (Dialing, Ended(_)) => true,

            // From Ringing
            (Ringing, Established) => true,
            (Ringing, Ended(_)) => true,

            // From Established
            (Established, Ended(_)) => true,

            // Can't transition from Ended
            (Ended(_), _) => false,

            // All other transitions are invalid
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, CallState::Ended(_))
    }

    pub fn is_established(&self) -> bool {
        matches!(self, CallState::Established)
    }
}

/// Reason for call ending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Local side hung up normally
    NormalClearing,
    /// Call was rejected
    Rejected,
    /// Peer was busy
    Busy,
    /// No answer within the invite timeout
    NoAnswer,
    /// Peer hung up
    PeerHangup,
    /// Invite was canceled before being answered
    Canceled,
    /// Call failed
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_state_transitions() {
        let idle = CallState::Idle;
        assert!(idle.can_transition_to(&CallState::Dialing));
        assert!(idle.can_transition_to(&CallState::Ringing));
        assert!(!idle.can_transition_to(&CallState::Established));

        let dialing = CallState::Dialing;
        assert!(dialing.can_transition_to(&CallState::Established));
        assert!(dialing.can_transition_to(&CallState::Ended(EndReason::Busy)));
        assert!(!dialing.can_transition_to(&CallState::Ringing));

        let ringing = CallState::Ringing;
        assert!(ringing.can_transition_to(&CallState::Established));
        assert!(ringing.can_transition_to(&CallState::Ended(EndReason::Rejected)));
    }

    #[test]
    fn test_invalid_state_transitions() {
        let ended = CallState::Ended(EndReason::NormalClearing);
        assert!(!ended.can_transition_to(&CallState::Established));
        assert!(!ended.can_transition_to(&CallState::Dialing));

        let established = CallState::Established;
        assert!(!established.can_transition_to(&CallState::Ringing));
    }

    #[test]
    fn test_is_active() {
        assert!(CallState::Dialing.is_active());
        assert!(CallState::Established.is_active());
        assert!(!CallState::Ended(EndReason::PeerHangup).is_active());
    }
}
