//! Session bounded context - manages the lifecycle of call sessions

pub mod aggregate;
pub mod value_object;

pub use aggregate::CallSession;
pub use value_object::{CallDirection, CallState, EndReason};
