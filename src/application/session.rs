//! Call session management
//!
//! Drives the INVITE/ACK/BYE/CANCEL choreography around the domain call
//! state machine. At most one outbound-or-established call plus one pending
//! inbound call exist at a time; anything beyond that is answered 486.

use crate::application::events::EventDispatcher;
use crate::config::SipConfig;
use crate::domain::account::Account;
use crate::domain::session::{CallDirection, CallSession, CallState, EndReason};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{SessionId, SipUri};
use crate::infrastructure::sip::auth::{authorization_header, DigestChallenge};
use crate::infrastructure::sip::{
    builder, ResponseBuilder, SipMessage, SipRequest, SipResponse, Transport,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A call session plus the SIP dialog state needed to keep talking about it
struct SessionContext {
    session: CallSession,
    call_id: String,
    local_tag: String,
    cseq: u32,
    /// Outbound: the invite we sent. Inbound: the invite we received.
    invite: SipRequest,
    /// Dialog identities once established, for a later BYE
    local_from: Option<String>,
    remote_to: Option<String>,
    auth_attempted: bool,
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    config: SipConfig,
    /// The outbound or established call
    current: Option<SessionContext>,
    /// An inbound call ringing but not yet answered or rejected
    pending: Option<SessionContext>,
    /// Answer timeout for an outbound invite
    deadline: Option<Instant>,
}

/// Extract the peer URI embedded in a From/To header value
fn peer_uri_from(value: &str) -> Option<SipUri> {
    let start = value.find("sip:")?;
    let rest = &value[start..];
    let end = rest.find(|c| c == '>' || c == ';').unwrap_or(rest.len());
    SipUri::parse(&rest[..end]).ok()
}

fn end_reason_for_status(status: u16) -> EndReason {
    match status {
        486 => EndReason::Busy,
        603 => EndReason::Rejected,
        408 | 480 => EndReason::NoAnswer,
        _ => EndReason::Failed(format!("call rejected with status {}", status)),
    }
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        dispatcher: EventDispatcher,
        config: SipConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            config,
            current: None,
            pending: None,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn owns_call_id(&self, call_id: &str) -> bool {
        self.current.as_ref().map(|c| c.call_id.as_str()) == Some(call_id)
            || self.pending.as_ref().map(|c| c.call_id.as_str()) == Some(call_id)
    }

    /// Dial a peer. `peer` may be a bare username (resolved against the
    /// account domain) or a full `sip:user@host` URI.
    pub async fn make_call(&mut self, account: &Account, peer: &str) -> Result<()> {
        if peer.trim().is_empty() {
            return Err(DomainError::InvalidArgument("empty peer".to_string()));
        }
        if self.current.is_some() {
            return Err(DomainError::CallInProgress);
        }

        let peer_uri = if peer.contains('@') {
            let raw = peer.strip_prefix("sip:").unwrap_or(peer);
            SipUri::parse(&format!("sip:{}", raw))?
        } else {
            SipUri::from_parts(peer, account.domain())?
        };

        let call_id = builder::new_call_id(account.domain());
        let local_tag = builder::new_tag();
        let invite = builder::invite_request(
            account,
            &peer_uri,
            self.transport.local_addr(),
            &call_id,
            &local_tag,
            1,
            None,
        )?;

        self.send(&SipMessage::Request(invite.clone())).await?;

        let mut session = CallSession::new(SessionId::new(), CallDirection::Outbound, peer_uri);
        session.dial()?;
        info!(%call_id, "Dialing {}", session.peer());

        self.current = Some(SessionContext {
            session,
            call_id,
            local_tag,
            cseq: 1,
            invite,
            local_from: None,
            remote_to: None,
            auth_attempted: false,
        });
        self.deadline = Some(Instant::now() + self.config.invite_timeout());
        Ok(())
    }

    /// Handle a response on one of our call legs
    pub async fn handle_response(&mut self, response: &SipResponse, account: Option<&Account>) {
        let status = response.status_code();
        let Some(ctx) = self.current.as_mut() else {
            debug!(status, "Dropping call response with no current session");
            return;
        };
        if !matches!(ctx.session.state(), CallState::Dialing) {
            debug!(status, "Dropping call response outside Dialing");
            return;
        }

        match status {
            100..=199 => {
                debug!(status, "Call progress");
            }
            200..=299 => {
                if let Err(e) = self.establish_outbound(response).await {
                    warn!("Failed to complete outbound call setup: {}", e);
                    self.finish_current(EndReason::Failed(e.to_string()));
                }
            }
            401 | 407 => {
                self.ack_failure(response).await;
                let retried = match account {
                    Some(account) if !self.current.as_ref().is_some_and(|c| c.auth_attempted) => {
                        self.retry_invite_with_auth(response, account).await.is_ok()
                    }
                    _ => false,
                };
                if !retried {
                    self.finish_current(EndReason::Failed("call authentication failed".to_string()));
                }
            }
            _ => {
                self.ack_failure(response).await;
                self.finish_current(end_reason_for_status(status));
            }
        }
    }

    /// An inbound INVITE arrived
    pub async fn handle_invite(&mut self, request: &SipRequest, registered: bool) {
        if !registered {
            debug!("Inbound invite while unregistered");
            self.reply(request, ResponseBuilder::temporarily_unavailable())
                .await;
            return;
        }
        if self.pending.is_some() {
            debug!("Inbound invite while one is already pending");
            self.reply(request, ResponseBuilder::busy_here()).await;
            return;
        }

        let Some(call_id) = request.call_id() else {
            warn!("Inbound invite without Call-ID");
            return;
        };
        let caller = request.caller_id().unwrap_or_else(|| "unknown".to_string());
        let peer = request
            .from_value()
            .as_deref()
            .and_then(peer_uri_from)
            .unwrap_or_else(|| SipUri::new(caller.clone(), "unknown".to_string(), None));

        let local_tag = builder::new_tag();
        self.reply(request, ResponseBuilder::ringing().to_tag(&local_tag))
            .await;

        let mut session = CallSession::new(SessionId::new(), CallDirection::Inbound, peer);
        if let Err(e) = session.ring() {
            warn!("Could not ring inbound session: {}", e);
            return;
        }

        info!(%call_id, caller, "Incoming call");
        self.pending = Some(SessionContext {
            session,
            call_id,
            local_tag,
            cseq: request.cseq_seq().unwrap_or(1),
            invite: request.clone(),
            local_from: None,
            remote_to: None,
            auth_attempted: false,
        });
        self.dispatcher.incoming_call(&caller);
    }

    /// Answer the pending inbound call, hanging up any call in progress first
    pub async fn take_incoming_call(&mut self, account: &Account) -> Result<()> {
        if self.pending.is_none() {
            return Err(DomainError::NoPendingCall);
        }
        if self.current.is_some() {
            self.end_current_call().await?;
        }

        let mut ctx = self.pending.take().ok_or(DomainError::NoPendingCall)?;
        let answer = match ResponseBuilder::ok()
            .to_tag(&ctx.local_tag)
            .contact(account.username(), self.transport.local_addr())
            .build_for_request(&ctx.invite)
        {
            Ok(answer) => answer,
            Err(e) => {
                self.discard(ctx, EndReason::Failed("could not build answer".to_string()));
                return Err(e.into());
            }
        };
        if let Err(e) = self.send(&SipMessage::Response(answer)).await {
            self.discard(ctx, EndReason::Failed("answer send failed".to_string()));
            return Err(e);
        }

        if let Err(e) = ctx.session.establish() {
            self.discard(ctx, EndReason::Failed(e.to_string()));
            return Err(e);
        }
        // Our side of the dialog is the invite's To plus our tag; the peer
        // side is its From, tag included.
        ctx.local_from = ctx
            .invite
            .to_value()
            .map(|to| format!("{};tag={}", to, ctx.local_tag));
        ctx.remote_to = ctx.invite.from_value();

        info!(call_id = %ctx.call_id, "Answered incoming call from {}", ctx.session.peer());
        self.current = Some(ctx);
        self.dispatcher.call_established();
        Ok(())
    }

    /// Decline the pending inbound call
    pub async fn reject_incoming_call(&mut self) -> Result<()> {
        let mut ctx = self.pending.take().ok_or(DomainError::NoPendingCall)?;

        let decline = match ResponseBuilder::decline()
            .to_tag(&ctx.local_tag)
            .build_for_request(&ctx.invite)
        {
            Ok(decline) => decline,
            Err(e) => {
                self.discard(ctx, EndReason::Rejected);
                return Err(e.into());
            }
        };
        if let Err(e) = self.send(&SipMessage::Response(decline)).await {
            // The decline never left, but the session is over locally
            self.discard(ctx, EndReason::Rejected);
            return Err(e);
        }

        if let Err(e) = ctx.session.end(EndReason::Rejected) {
            warn!("Could not end rejected session: {}", e);
        }
        info!(call_id = %ctx.call_id, "Rejected incoming call");
        self.dispatcher.call_ended();
        Ok(())
    }

    /// Hang up the current call. A no-op when no call is in progress.
    pub async fn end_current_call(&mut self) -> Result<()> {
        let Some(mut ctx) = self.current.take() else {
            debug!("No current call to end");
            return Ok(());
        };
        self.deadline = None;

        match ctx.session.state() {
            CallState::Established => {
                ctx.cseq += 1;
                match builder::bye_request(
                    ctx.session.peer(),
                    ctx.local_from.as_deref().unwrap_or_default(),
                    ctx.remote_to.as_deref().unwrap_or_default(),
                    &ctx.call_id,
                    ctx.cseq,
                    self.transport.local_addr(),
                ) {
                    Ok(bye) => {
                        if let Err(e) = self.send(&SipMessage::Request(bye)).await {
                            warn!("BYE send failed: {}", e);
                        }
                    }
                    Err(e) => warn!("Could not build BYE: {}", e),
                }
                let _ = ctx.session.end(EndReason::NormalClearing);
            }
            CallState::Dialing => {
                match builder::cancel_for(&ctx.invite) {
                    Ok(cancel) => {
                        if let Err(e) = self.send(&SipMessage::Request(cancel)).await {
                            warn!("CANCEL send failed: {}", e);
                        }
                    }
                    Err(e) => warn!("Could not build CANCEL: {}", e),
                }
                let _ = ctx.session.end(EndReason::Canceled);
            }
            state => {
                debug!(?state, "Ending call in unexpected state");
                let _ = ctx.session.end(EndReason::NormalClearing);
            }
        }

        info!(call_id = %ctx.call_id, "Call ended locally");
        self.dispatcher.call_ended();
        Ok(())
    }

    /// Peer hung up an established call
    pub async fn handle_bye(&mut self, request: &SipRequest) {
        let call_id = request.call_id().unwrap_or_default();
        let owns = self
            .current
            .as_ref()
            .is_some_and(|c| c.call_id == call_id);
        if !owns {
            self.reply(request, ResponseBuilder::call_does_not_exist())
                .await;
            return;
        }

        self.reply(request, ResponseBuilder::ok()).await;
        if let Some(mut ctx) = self.current.take() {
            let _ = ctx.session.end(EndReason::PeerHangup);
            info!(call_id = %ctx.call_id, "Peer hung up");
        }
        self.deadline = None;
        self.dispatcher.call_ended();
    }

    /// Peer abandoned an inbound invite before we answered
    pub async fn handle_cancel(&mut self, request: &SipRequest) {
        let call_id = request.call_id().unwrap_or_default();
        let owns = self
            .pending
            .as_ref()
            .is_some_and(|c| c.call_id == call_id);
        if !owns {
            self.reply(request, ResponseBuilder::call_does_not_exist())
                .await;
            return;
        }

        self.reply(request, ResponseBuilder::ok()).await;
        if let Some(mut ctx) = self.pending.take() {
            // The abandoned invite itself gets a 487
            if let Ok(terminated) = ResponseBuilder::new(487)
                .to_tag(&ctx.local_tag)
                .build_for_request(&ctx.invite)
            {
                let _ = self.send(&SipMessage::Response(terminated)).await;
            }
            let _ = ctx.session.end(EndReason::Canceled);
            info!(call_id = %ctx.call_id, "Incoming call canceled by peer");
        }
        self.dispatcher.call_ended();
    }

    /// The outbound invite answer timeout fired
    pub async fn handle_timeout(&mut self) {
        self.deadline = None;
        let Some(ctx) = self.current.as_ref() else {
            return;
        };
        if !matches!(ctx.session.state(), CallState::Dialing) {
            return;
        }

        warn!(call_id = %ctx.call_id, "No answer within timeout");
        if let Ok(cancel) = builder::cancel_for(&ctx.invite) {
            let _ = self.send(&SipMessage::Request(cancel)).await;
        }
        self.finish_current(EndReason::NoAnswer);
    }

    /// Toggle speakerphone on the current call. Silently ignored otherwise.
    pub fn set_speaker_mode(&mut self, enabled: bool) {
        match self.current.as_mut() {
            Some(ctx) => ctx.session.set_speaker_mode(enabled),
            None => debug!("Speaker mode toggled with no call in progress"),
        }
    }

    pub fn speaker_mode(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.session.speaker_mode())
    }

    /// Tear down every session, used when the account disconnects.
    /// The pending inbound call is declined before the current call ends.
    pub async fn end_all(&mut self) {
        if self.pending.is_some() {
            if let Err(e) = self.reject_incoming_call().await {
                warn!("Could not reject pending call during teardown: {}", e);
            }
        }
        if self.current.is_some() {
            if let Err(e) = self.end_current_call().await {
                warn!("Could not end current call during teardown: {}", e);
            }
        }
    }

    async fn establish_outbound(&mut self, response: &SipResponse) -> Result<()> {
        let ctx = self.current.as_mut().ok_or(DomainError::NoPendingCall)?;

        let ack = builder::ack_for(&ctx.invite, response, self.transport.local_addr())?;
        self.transport
            .send(&SipMessage::Request(ack))
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))?;

        let ctx = self.current.as_mut().ok_or(DomainError::NoPendingCall)?;
        ctx.session.establish()?;
        ctx.local_from = ctx.invite.from_value();
        ctx.remote_to = response.to_value();
        self.deadline = None;

        info!(call_id = %ctx.call_id, "Call established with {}", ctx.session.peer());
        self.dispatcher.call_established();
        Ok(())
    }

    async fn retry_invite_with_auth(
        &mut self,
        response: &SipResponse,
        account: &Account,
    ) -> Result<()> {
        let header_value = response
            .auth_challenge()
            .ok_or_else(|| DomainError::AuthFailure("challenge without header".to_string()))?;
        let challenge = DigestChallenge::parse(&header_value)
            .map_err(|e| DomainError::AuthFailure(e.to_string()))?;

        let ctx = self.current.as_ref().ok_or(DomainError::NoPendingCall)?;
        let uri = ctx.session.peer().to_string();
        let authorization = authorization_header(
            &challenge,
            account.username(),
            account.credential(),
            "INVITE",
            &uri,
        );

        let cseq = ctx.cseq + 1;
        let invite = builder::invite_request(
            account,
            ctx.session.peer(),
            self.transport.local_addr(),
            &ctx.call_id,
            &ctx.local_tag,
            cseq,
            Some(&authorization),
        )?;
        self.send(&SipMessage::Request(invite.clone())).await?;

        let ctx = self.current.as_mut().ok_or(DomainError::NoPendingCall)?;
        ctx.cseq = cseq;
        ctx.invite = invite;
        ctx.auth_attempted = true;
        self.deadline = Some(Instant::now() + self.config.invite_timeout());
        Ok(())
    }

    /// ACK a non-2xx final INVITE response so the server stops retransmitting
    async fn ack_failure(&mut self, response: &SipResponse) {
        let Some(ctx) = self.current.as_ref() else {
            return;
        };
        match builder::ack_for(&ctx.invite, response, self.transport.local_addr()) {
            Ok(ack) => {
                let _ = self.send(&SipMessage::Request(ack)).await;
            }
            Err(e) => debug!("Could not build failure ACK: {}", e),
        }
    }

    /// Close out a session that could not be answered or declined cleanly,
    /// so the listener still sees its lifecycle finish.
    fn discard(&mut self, mut ctx: SessionContext, reason: EndReason) {
        info!(call_id = %ctx.call_id, ?reason, "Discarding session");
        let _ = ctx.session.end(reason);
        self.dispatcher.call_ended();
    }

    fn finish_current(&mut self, reason: EndReason) {
        if let Some(mut ctx) = self.current.take() {
            info!(call_id = %ctx.call_id, ?reason, "Call finished");
            let _ = ctx.session.end(reason);
        }
        self.deadline = None;
        self.dispatcher.call_ended();
    }

    async fn send(&self, message: &SipMessage) -> Result<()> {
        self.transport
            .send(message)
            .await
            .map_err(|e| DomainError::Transport(e.to_string()))
    }

    async fn reply(&self, request: &SipRequest, builder: ResponseBuilder) {
        match builder.build_for_request(request) {
            Ok(response) => {
                if let Err(e) = self.send(&SipMessage::Response(response)).await {
                    warn!("Reply send failed: {}", e);
                }
            }
            Err(e) => warn!("Could not build reply: {}", e),
        }
    }
}
