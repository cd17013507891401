//! Infrastructure layer - Technical implementations
//!
//! Protocol plumbing only: the SIP wire codec, request builders, digest
//! authentication and the UDP transport.

pub mod sip;
