//! Domain errors

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DomainError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not registered with a SIP server")]
    NotRegistered,

    #[error("Already registered")]
    AlreadyRegistered,

    #[error("No incoming call is pending")]
    NoPendingCall,

    #[error("A call is already in progress")]
    CallInProgress,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("User agent is shut down")]
    Shutdown,
}
