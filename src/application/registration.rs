//! Registration lifecycle
//!
//! Owns the REGISTER handshake, digest-auth retry, the renewal timer and
//! de-registration. One account, one registration at a time. There is no
//! automatic retry out of Failed; the caller must connect again.

use crate::application::events::EventDispatcher;
use crate::config::SipConfig;
use crate::domain::account::{Account, RegistrationState};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::infrastructure::sip::auth::{authorization_header, DigestChallenge};
use crate::infrastructure::sip::{builder, SipMessage, SipResponse, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// An outstanding REGISTER waiting for its final response
struct PendingRegister {
    auth_attempted: bool,
}

pub struct RegistrationManager {
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    config: SipConfig,
    account: Option<Account>,
    state: RegistrationState,
    pending: Option<PendingRegister>,
    /// Response timeout while a REGISTER is pending, renewal time otherwise
    deadline: Option<Instant>,
    call_id: String,
    from_tag: String,
    cseq: u32,
}

impl RegistrationManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        dispatcher: EventDispatcher,
        config: SipConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            config,
            account: None,
            state: RegistrationState::Unregistered,
            pending: None,
            deadline: None,
            call_id: String::new(),
            from_tag: String::new(),
            cseq: 0,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.state.is_registered()
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Next instant the event loop must wake this manager at
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether a response with this Call-ID belongs to the registration leg
    pub fn owns_call_id(&self, call_id: &str) -> bool {
        !self.call_id.is_empty() && self.call_id == call_id
    }

    /// Start a registration. Validation failures surface on the command
    /// future and leave all state untouched.
    pub async fn connect(&mut self, domain: &str, username: &str, password: &str) -> Result<()> {
        if !self.state.can_connect() {
            return Err(DomainError::AlreadyRegistered);
        }

        let account = Account::new(domain, username, password)?;
        let server = format!("{}:{}", account.domain(), self.config.server_port);

        self.call_id = builder::new_call_id(account.domain());
        self.from_tag = builder::new_tag();
        self.cseq = 0;
        self.account = Some(account);
        self.state = RegistrationState::Registering;
        self.dispatcher.connecting();

        if let Err(e) = self.transport.open(&server).await {
            warn!("Failed to open transport to {}: {}", server, e);
            self.state = RegistrationState::Failed;
            self.account = None;
            // The listener saw on_connecting; close the attempt out for it
            self.dispatcher.connection_failed();
            return Err(DomainError::Transport(e.to_string()));
        }

        if let Err(e) = self
            .send_register(None, self.config.register_expiry_secs)
            .await
        {
            self.state = RegistrationState::Failed;
            self.account = None;
            self.dispatcher.connection_failed();
            return Err(e);
        }

        self.pending = Some(PendingRegister {
            auth_attempted: false,
        });
        self.deadline = Some(Instant::now() + self.config.register_timeout());
        Ok(())
    }

    /// De-register and drop the account. A no-op unless a registration
    /// exists or is in flight.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.state {
            RegistrationState::Unregistered => return Ok(()),
            RegistrationState::Failed => {
                self.reset();
                return Ok(());
            }
            RegistrationState::Registering => {
                info!("Abandoning in-flight registration");
            }
            RegistrationState::Registered => {
                // Fire-and-forget de-registration; local state wins either way
                if let Err(e) = self.send_register(None, 0).await {
                    warn!("De-registration send failed: {}", e);
                }
            }
        }

        self.transport.set_active(false);
        self.transport.close().await;
        self.reset();
        Ok(())
    }

    /// Handle a response on the registration leg
    pub async fn handle_response(&mut self, response: &SipResponse) {
        let status = response.status_code();

        let Some(pending) = self.pending.as_ref() else {
            debug!(status, "Dropping registration response with nothing pending");
            return;
        };

        match status {
            100..=199 => {}
            200..=299 => self.on_registered(response),
            401 | 407 => {
                if pending.auth_attempted {
                    self.fail("credentials rejected by server");
                    return;
                }
                if let Err(e) = self.answer_challenge(response).await {
                    warn!("Registration auth retry failed: {}", e);
                    self.fail("could not answer auth challenge");
                }
            }
            _ => {
                warn!(status, "Registration rejected");
                self.fail("registration rejected");
            }
        }
    }

    /// A deadline fired: response timeout while pending, renewal otherwise
    pub async fn handle_timeout(&mut self) {
        if self.pending.is_some() {
            warn!("No final response to REGISTER within timeout");
            self.fail("registration timed out");
            return;
        }

        if self.state.is_registered() {
            debug!("Renewing registration");
            if let Err(e) = self
                .send_register(None, self.config.register_expiry_secs)
                .await
            {
                warn!("Registration renewal send failed: {}", e);
                self.fail("renewal send failed");
                return;
            }
            self.pending = Some(PendingRegister {
                auth_attempted: false,
            });
            self.deadline = Some(Instant::now() + self.config.register_timeout());
        }
    }

    fn on_registered(&mut self, response: &SipResponse) {
        let granted = response
            .expires()
            .unwrap_or(self.config.register_expiry_secs)
            .max(1);
        let renewal = Duration::from_secs(((granted as u64) * 9 / 10).max(1));

        let was_registering = self.state == RegistrationState::Registering;
        self.state = RegistrationState::Registered;
        self.pending = None;
        self.deadline = Some(Instant::now() + renewal);
        self.transport.set_active(true);

        info!(granted, "Registered; renewal in {:?}", renewal);
        if was_registering {
            self.dispatcher.connection_success();
        }
    }

    async fn answer_challenge(&mut self, response: &SipResponse) -> Result<()> {
        let header_value = response
            .auth_challenge()
            .ok_or_else(|| DomainError::AuthFailure("challenge without header".to_string()))?;
        let challenge = DigestChallenge::parse(&header_value)
            .map_err(|e| DomainError::AuthFailure(e.to_string()))?;

        let account = self.account.as_ref().ok_or(DomainError::NotRegistered)?;
        let uri = format!("sip:{}", account.domain());
        let authorization = authorization_header(
            &challenge,
            account.username(),
            account.credential(),
            "REGISTER",
            &uri,
        );

        self.send_register(Some(&authorization), self.config.register_expiry_secs)
            .await?;

        if let Some(pending) = self.pending.as_mut() {
            pending.auth_attempted = true;
        }
        self.deadline = Some(Instant::now() + self.config.register_timeout());
        Ok(())
    }

    async fn send_register(&mut self, authorization: Option<&str>, expires: u32) -> Result<()> {
        let account = self.account.as_ref().ok_or(DomainError::NotRegistered)?;

        self.cseq += 1;
        let request = builder::register_request(
            account,
            self.transport.local_addr(),
            &self.call_id,
            &self.from_tag,
            self.cseq,
            expires,
            authorization,
        )?;

        self.transport
            .send(&SipMessage::Request(request))
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))
    }

    fn fail(&mut self, reason: &str) {
        warn!("Registration failed: {}", reason);
        self.state = RegistrationState::Failed;
        self.pending = None;
        self.deadline = None;
        self.transport.set_active(false);
        self.dispatcher.connection_failed();
    }

    fn reset(&mut self) {
        self.state = RegistrationState::Unregistered;
        self.account = None;
        self.pending = None;
        self.deadline = None;
        self.call_id = String::new();
        self.from_tag = String::new();
        self.cseq = 0;
    }
}
