//! Lifecycle event delivery to the Client Shell
//!
//! The listener is the capability set the consumer hands in at startup.
//! Delivery is fire-and-forget: the dispatcher invokes the listener inline
//! from the event loop, so events arrive exactly once per state transition
//! and in transition order, but a listener that drops them gets no replay.

use std::sync::Arc;
use tracing::debug;

/// Callbacks implemented by the Client Shell.
///
/// Every method has an empty default body, so a consumer only overrides
/// what it cares about. Implementations must return quickly; they run on
/// the user-agent event loop.
pub trait SipEventListener: Send + Sync {
    /// Registration attempt started
    fn on_connecting(&self) {}

    /// Registration accepted by the server
    fn on_connection_success(&self) {}

    /// Registration rejected or timed out
    fn on_connection_failed(&self) {}

    /// A call (either direction) was answered
    fn on_call_established(&self) {}

    /// A call finished, whoever ended it
    fn on_call_ended(&self) {}

    /// An inbound call is ringing
    fn on_incoming_call(&self, caller_id: &str) {
        let _ = caller_id;
    }
}

/// Fans lifecycle notifications out to the registered listener
#[derive(Clone)]
pub struct EventDispatcher {
    listener: Arc<dyn SipEventListener>,
}

impl EventDispatcher {
    pub fn new(listener: Arc<dyn SipEventListener>) -> Self {
        Self { listener }
    }

    pub fn connecting(&self) {
        debug!("event: on_connecting");
        self.listener.on_connecting();
    }

    pub fn connection_success(&self) {
        debug!("event: on_connection_success");
        self.listener.on_connection_success();
    }

    pub fn connection_failed(&self) {
        debug!("event: on_connection_failed");
        self.listener.on_connection_failed();
    }

    pub fn call_established(&self) {
        debug!("event: on_call_established");
        self.listener.on_call_established();
    }

    pub fn call_ended(&self) {
        debug!("event: on_call_ended");
        self.listener.on_call_ended();
    }

    pub fn incoming_call(&self, caller_id: &str) {
        debug!(caller_id, "event: on_incoming_call");
        self.listener.on_incoming_call(caller_id);
    }
}
