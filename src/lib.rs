//! Parley - a SIP user-agent call-control core
//!
//! This is a Domain-Driven Design (DDD) implementation of the call-control
//! side of a SIP softphone: account registration, a single-call session
//! state machine and lifecycle event delivery, all driven by one actor-style
//! event loop.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{SipEventListener, UserAgent, UserAgentHandle};
pub use config::Config;
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
