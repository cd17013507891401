//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sip: SipConfig,
    /// Account the daemon registers on startup, if any
    #[serde(default)]
    pub account: Option<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    /// Server port used when connecting to a domain
    pub server_port: u16,
    /// Registration expiry requested in REGISTER
    pub register_expiry_secs: u32,
    /// How long to wait for a final REGISTER response
    pub register_timeout_secs: u64,
    /// How long an outbound invite may ring before giving up
    pub invite_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub domain: String,
    pub username: String,
    pub password: String,
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            server_port: 5060,
            register_expiry_secs: 3600,
            register_timeout_secs: 10,
            invite_timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sip: SipConfig::default(),
            account: None,
        }
    }
}

impl SipConfig {
    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn invite_timeout(&self) -> Duration {
        Duration::from_secs(self.invite_timeout_secs)
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
