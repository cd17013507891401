//! Shared value objects used across bounded contexts

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Call session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SIP URI value object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SipUri {
    user: String,
    host: String,
    port: Option<u16>,
}

impl SipUri {
    pub fn new(user: String, host: String, port: Option<u16>) -> Self {
        Self { user, host, port }
    }

    /// Build a URI from the user/domain pair the command surface hands us.
    pub fn from_parts(user: &str, host: &str) -> Result<Self> {
        if user.trim().is_empty() {
            return Err(DomainError::InvalidArgument("empty username".to_string()));
        }
        if host.trim().is_empty() {
            return Err(DomainError::InvalidArgument("empty domain".to_string()));
        }
        Ok(Self::new(user.trim().to_string(), host.trim().to_string(), None))
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("sip:")
            .ok_or_else(|| DomainError::InvalidArgument("URI must start with 'sip:'".to_string()))?;

        let (user, host_port) = rest.split_once('@').ok_or_else(|| {
            DomainError::InvalidArgument("SIP URI must contain user@host".to_string())
        })?;

        if user.is_empty() || host_port.is_empty() {
            return Err(DomainError::InvalidArgument("Invalid SIP URI format".to_string()));
        }

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => (host, port.parse().ok()),
            None => (host_port, None),
        };

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(port) = self.port {
            write!(f, "sip:{}@{}:{}", self.user, self.host, port)
        } else {
            write!(f, "sip:{}@{}", self.user, self.host)
        }
    }
}
