//! Account value objects

use serde::{Deserialize, Serialize};

/// Registration state of the single account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    /// No registration exists
    Unregistered,
    /// REGISTER sent, waiting for the final response
    Registering,
    /// Registration accepted by the server
    Registered,
    /// Registration rejected or timed out; caller must connect again
    Failed,
}

impl RegistrationState {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationState::Registered)
    }

    /// Whether `connect` may start a new registration from this state
    pub fn can_connect(&self) -> bool {
        matches!(self, RegistrationState::Unregistered | RegistrationState::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "Unregistered",
            RegistrationState::Registering => "Registering",
            RegistrationState::Registered => "Registered",
            RegistrationState::Failed => "Failed",
        }
    }
}
