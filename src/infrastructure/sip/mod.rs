//! SIP protocol implementation
//!
//! The user-agent side of a SIP-compatible text protocol: message wrappers
//! over `rsip`, client request builders, digest-auth challenge answering and
//! the single-flow UDP transport.

pub mod auth;
pub mod builder;
pub mod message;
pub mod transport;

pub use auth::{authorization_header, DigestChallenge};
pub use builder::ResponseBuilder;
pub use message::{SipError, SipMessage, SipMethod, SipRequest, SipResponse};
pub use transport::{IncomingMessage, Transport, UdpTransport};
