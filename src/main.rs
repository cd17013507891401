use parley::config::Config;
use parley::{SipEventListener, UserAgent};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber;

/// Logs every lifecycle event the agent emits
struct LoggingListener;

impl SipEventListener for LoggingListener {
    fn on_connecting(&self) {
        info!("Connecting to SIP server...");
    }

    fn on_connection_success(&self) {
        info!("Registered");
    }

    fn on_connection_failed(&self) {
        warn!("Registration failed");
    }

    fn on_call_established(&self) {
        info!("Call established");
    }

    fn on_call_ended(&self) {
        info!("Call ended");
    }

    fn on_incoming_call(&self, caller_id: &str) {
        info!("Incoming call from {}", caller_id);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting Parley SIP user agent");

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(Path::new(&path))?,
        None => Config::default(),
    };

    let handle = UserAgent::spawn(config.sip.clone(), Arc::new(LoggingListener));

    if let Some(account) = &config.account {
        handle
            .connect(&account.domain, &account.username, &account.password)
            .await?;
    } else {
        info!("No account configured; agent idle");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.disconnect().await?;

    Ok(())
}
