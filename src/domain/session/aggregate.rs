//! Call session aggregate root

use crate::domain::session::value_object::{CallDirection, CallState, EndReason};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{SessionId, SipUri};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One call attempt, inbound or outbound.
///
/// Enforces the call state machine; every transition goes through
/// [`CallState::can_transition_to`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    id: SessionId,
    direction: CallDirection,
    peer: SipUri,
    state: CallState,
    /// Speakerphone flag; only meaningful while Established
    speaker_mode: bool,
    started_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(id: SessionId, direction: CallDirection, peer: SipUri) -> Self {
        Self {
            id,
            direction,
            peer,
            state: CallState::Idle,
            speaker_mode: false,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
        }
    }

    /// Move an outbound session into Dialing once the invite is on the wire
    pub fn dial(&mut self) -> Result<()> {
        self.transition_to(CallState::Dialing)
    }

    /// Move an inbound session into Ringing once the peer invite arrived
    pub fn ring(&mut self) -> Result<()> {
        self.transition_to(CallState::Ringing)
    }

    /// Both sides accepted the call
    pub fn establish(&mut self) -> Result<()> {
        self.transition_to(CallState::Established)?;
        self.answered_at = Some(Utc::now());
        Ok(())
    }

    /// Terminate the session
    pub fn end(&mut self, reason: EndReason) -> Result<()> {
        self.transition_to(CallState::Ended(reason))?;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Toggle speakerphone. Silently ignored unless Established.
    pub fn set_speaker_mode(&mut self, enabled: bool) {
        if self.state.is_established() {
            self.speaker_mode = enabled;
        }
    }

    fn transition_to(&mut self, new_state: CallState) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(DomainError::InvalidStateTransition(format!(
                "cannot transition from {:?} to {:?}",
                self.state, new_state
            )));
        }

        self.state = new_state;
        Ok(())
    }

    // Getters
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn peer(&self) -> &SipUri {
        &self.peer
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn speaker_mode(&self) -> bool {
        self.speaker_mode
    }

    pub fn started_at(&self) -> &DateTime<Utc> {
        &self.started_at
    }

    pub fn answered_at(&self) -> Option<&DateTime<Utc>> {
        self.answered_at.as_ref()
    }

    pub fn ended_at(&self) -> Option<&DateTime<Utc>> {
        self.ended_at.as_ref()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.answered_at
            .and_then(|answered| self.ended_at.map(|ended| ended - answered))
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}
