//! Application layer - use case orchestration
//!
//! The user-agent event loop plus the registration and session managers it
//! drives, and the listener seam events flow out through.

pub mod events;
pub mod registration;
pub mod session;
pub mod user_agent;

pub use events::{EventDispatcher, SipEventListener};
pub use registration::RegistrationManager;
pub use session::SessionManager;
pub use user_agent::{UserAgent, UserAgentHandle};
