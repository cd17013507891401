//! The user-agent actor
//!
//! All registration and call state lives on one event loop task. Consumers
//! talk to it through [`UserAgentHandle`], which turns each method call into
//! a command carrying a oneshot reply channel. Incoming SIP traffic and the
//! managers' timers are multiplexed onto the same loop, so no state is ever
//! touched from two tasks.

use crate::application::events::{EventDispatcher, SipEventListener};
use crate::application::registration::RegistrationManager;
use crate::application::session::SessionManager;
use crate::config::SipConfig;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::infrastructure::sip::{
    IncomingMessage, SipMessage, SipMethod, Transport, UdpTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

const COMMAND_BUFFER: usize = 32;
const INCOMING_BUFFER: usize = 64;

/// Commands the handle sends into the event loop
enum Command {
    Connect {
        domain: String,
        username: String,
        password: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    MakeCall {
        peer: String,
        reply: oneshot::Sender<Result<()>>,
    },
    EndCurrentCall {
        reply: oneshot::Sender<Result<()>>,
    },
    TakeIncomingCall {
        reply: oneshot::Sender<Result<()>>,
    },
    RejectIncomingCall {
        reply: oneshot::Sender<Result<()>>,
    },
    SetSpeakerMode {
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable command surface of a running user agent.
///
/// Every method resolves once the event loop has fully processed the
/// command. Once the agent shuts down all methods fail with
/// [`DomainError::Shutdown`].
#[derive(Clone)]
pub struct UserAgentHandle {
    tx: mpsc::Sender<Command>,
}

impl UserAgentHandle {
    async fn request<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| DomainError::Shutdown)?;
        response.await.map_err(|_| DomainError::Shutdown)?
    }

    /// Register an account against its SIP domain
    pub async fn connect(&self, domain: &str, username: &str, password: &str) -> Result<()> {
        self.request(|reply| Command::Connect {
            domain: domain.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            reply,
        })
        .await
    }

    /// Tear down all calls and de-register
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Dial a peer (bare username or full `sip:user@host` URI)
    pub async fn make_call(&self, peer: &str) -> Result<()> {
        self.request(|reply| Command::MakeCall {
            peer: peer.to_string(),
            reply,
        })
        .await
    }

    /// Hang up the current call
    pub async fn end_current_call(&self) -> Result<()> {
        self.request(|reply| Command::EndCurrentCall { reply }).await
    }

    /// Answer the pending inbound call, ending any current call first
    pub async fn take_incoming_call(&self) -> Result<()> {
        self.request(|reply| Command::TakeIncomingCall { reply })
            .await
    }

    /// Decline the pending inbound call
    pub async fn reject_incoming_call(&self) -> Result<()> {
        self.request(|reply| Command::RejectIncomingCall { reply })
            .await
    }

    /// Toggle speakerphone on the current call
    pub async fn set_speaker_mode(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetSpeakerMode { enabled, reply })
            .await
    }
}

/// The event loop task behind a [`UserAgentHandle`]
pub struct UserAgent {
    registration: RegistrationManager,
    sessions: SessionManager,
    commands: mpsc::Receiver<Command>,
    incoming: mpsc::Receiver<IncomingMessage>,
}

/// Placeholder instant for disabled timer branches; never polled
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365)
}

impl UserAgent {
    /// Spawn a user agent over a fresh UDP transport
    pub fn spawn(config: SipConfig, listener: Arc<dyn SipEventListener>) -> UserAgentHandle {
        let (transport, incoming) = UdpTransport::new(INCOMING_BUFFER);
        Self::spawn_with_transport(config, listener, Arc::new(transport), incoming)
    }

    /// Spawn over an externally supplied transport. The receiver must be the
    /// inbound channel fed by that transport.
    pub fn spawn_with_transport(
        config: SipConfig,
        listener: Arc<dyn SipEventListener>,
        transport: Arc<dyn Transport>,
        incoming: mpsc::Receiver<IncomingMessage>,
    ) -> UserAgentHandle {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let dispatcher = EventDispatcher::new(listener);

        let agent = UserAgent {
            registration: RegistrationManager::new(
                transport.clone(),
                dispatcher.clone(),
                config.clone(),
            ),
            sessions: SessionManager::new(transport, dispatcher, config),
            commands,
            incoming,
        };
        tokio::spawn(agent.run());

        UserAgentHandle { tx }
    }

    async fn run(mut self) {
        info!("User agent started");

        loop {
            let registration_deadline = self.registration.deadline();
            let session_deadline = self.sessions.deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone
                        break;
                    };
                    self.handle_command(command).await;
                }
                Some(incoming) = self.incoming.recv() => {
                    self.handle_message(incoming.message).await;
                }
                _ = sleep_until(registration_deadline.unwrap_or_else(far_future)),
                    if registration_deadline.is_some() =>
                {
                    self.registration.handle_timeout().await;
                }
                _ = sleep_until(session_deadline.unwrap_or_else(far_future)),
                    if session_deadline.is_some() =>
                {
                    self.sessions.handle_timeout().await;
                }
            }
        }

        self.sessions.end_all().await;
        if let Err(e) = self.registration.disconnect().await {
            debug!("Disconnect during shutdown failed: {}", e);
        }
        info!("User agent stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                domain,
                username,
                password,
                reply,
            } => {
                let result = self.registration.connect(&domain, &username, &password).await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.sessions.end_all().await;
                let result = self.registration.disconnect().await;
                let _ = reply.send(result);
            }
            Command::MakeCall { peer, reply } => {
                let result = match self.registration.account().cloned() {
                    Some(account) if self.registration.is_registered() => {
                        self.sessions.make_call(&account, &peer).await
                    }
                    _ => Err(DomainError::NotRegistered),
                };
                let _ = reply.send(result);
            }
            Command::EndCurrentCall { reply } => {
                let _ = reply.send(self.sessions.end_current_call().await);
            }
            Command::TakeIncomingCall { reply } => {
                let result = match self.registration.account().cloned() {
                    Some(account) => self.sessions.take_incoming_call(&account).await,
                    None => Err(DomainError::NotRegistered),
                };
                let _ = reply.send(result);
            }
            Command::RejectIncomingCall { reply } => {
                let _ = reply.send(self.sessions.reject_incoming_call().await);
            }
            Command::SetSpeakerMode { enabled, reply } => {
                self.sessions.set_speaker_mode(enabled);
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn handle_message(&mut self, message: SipMessage) {
        match message {
            SipMessage::Response(response) => {
                let Some(call_id) = response.call_id() else {
                    debug!("Dropping response without Call-ID");
                    return;
                };
                if self.registration.owns_call_id(&call_id) {
                    self.registration.handle_response(&response).await;
                } else if self.sessions.owns_call_id(&call_id) {
                    let account = self.registration.account().cloned();
                    self.sessions
                        .handle_response(&response, account.as_ref())
                        .await;
                } else {
                    debug!(%call_id, "Dropping response for unknown transaction");
                }
            }
            SipMessage::Request(request) => match request.method() {
                Some(SipMethod::Invite) => {
                    let registered = self.registration.is_registered();
                    self.sessions.handle_invite(&request, registered).await;
                }
                Some(SipMethod::Bye) => self.sessions.handle_bye(&request).await,
                Some(SipMethod::Cancel) => self.sessions.handle_cancel(&request).await,
                Some(SipMethod::Ack) => debug!("ACK received"),
                other => debug!(?other, "Ignoring unsupported request"),
            },
        }
    }
}
