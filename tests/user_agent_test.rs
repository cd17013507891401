//! End-to-end tests for the user-agent event loop.
//!
//! The agent runs over a scripted transport: every outbound message lands in
//! a channel the test consumes, and the test plays the server by pushing
//! responses and requests into the inbound channel.

use async_trait::async_trait;
use parley::application::{SipEventListener, UserAgent, UserAgentHandle};
use parley::config::SipConfig;
use parley::domain::shared::error::DomainError;
use parley::infrastructure::sip::{
    IncomingMessage, ResponseBuilder, SipError, SipMessage, SipMethod, SipRequest, Transport,
};
use rsip::Header;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

struct ScriptedTransport {
    sent: mpsc::UnboundedSender<SipMessage>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _server: &str) -> Result<(), SipError> {
        Ok(())
    }

    async fn close(&self) {}

    async fn send(&self, message: &SipMessage) -> Result<(), SipError> {
        self.sent
            .send(message.clone())
            .map_err(|_| SipError::TransportError("test channel closed".to_string()))
    }

    fn local_addr(&self) -> SocketAddr {
        "127.0.0.1:5060".parse().unwrap()
    }

    fn set_active(&self, _active: bool) {}
}

struct ChannelListener {
    events: mpsc::UnboundedSender<String>,
}

impl SipEventListener for ChannelListener {
    fn on_connecting(&self) {
        let _ = self.events.send("connecting".to_string());
    }
    fn on_connection_success(&self) {
        let _ = self.events.send("success".to_string());
    }
    fn on_connection_failed(&self) {
        let _ = self.events.send("failed".to_string());
    }
    fn on_call_established(&self) {
        let _ = self.events.send("established".to_string());
    }
    fn on_call_ended(&self) {
        let _ = self.events.send("ended".to_string());
    }
    fn on_incoming_call(&self, caller_id: &str) {
        let _ = self.events.send(format!("incoming:{}", caller_id));
    }
}

struct Harness {
    handle: UserAgentHandle,
    sent: mpsc::UnboundedReceiver<SipMessage>,
    events: mpsc::UnboundedReceiver<String>,
    incoming: mpsc::Sender<IncomingMessage>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(SipConfig::default())
    }

    fn with_config(config: SipConfig) -> Self {
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (incoming, incoming_rx) = mpsc::channel(16);

        let handle = UserAgent::spawn_with_transport(
            config,
            Arc::new(ChannelListener { events: event_tx }),
            Arc::new(ScriptedTransport { sent: sent_tx }),
            incoming_rx,
        );

        Self {
            handle,
            sent,
            events,
            incoming,
        }
    }

    async fn next_sent(&mut self) -> SipMessage {
        timeout(Duration::from_secs(3), self.sent.recv())
            .await
            .expect("no message sent in time")
            .expect("transport channel closed")
    }

    async fn next_event(&mut self) -> String {
        timeout(Duration::from_secs(3), self.events.recv())
            .await
            .expect("no event in time")
            .expect("event channel closed")
    }

    async fn push(&self, message: SipMessage) {
        self.incoming
            .send(IncomingMessage {
                message,
                source: "192.0.2.1:5060".parse().unwrap(),
            })
            .await
            .expect("agent gone");
    }

    /// Drive a full successful registration
    async fn register(&mut self) -> SipRequest {
        self.handle
            .connect("iptel.org", "lglossman", "qwerty")
            .await
            .unwrap();
        assert_eq!(self.next_event().await, "connecting");

        let register = self.next_sent().await.as_request().unwrap().clone();
        assert_eq!(register.method(), Some(SipMethod::Register));

        let ok = ResponseBuilder::ok()
            .to_tag("reg")
            .header(Header::Expires("3600".into()))
            .build_for_request(&register)
            .unwrap();
        self.push(SipMessage::Response(ok)).await;
        assert_eq!(self.next_event().await, "success");
        register
    }

    /// Drive an outbound call up to Established, returning our invite
    async fn establish_outbound(&mut self, peer: &str) -> SipRequest {
        self.handle.make_call(peer).await.unwrap();
        let invite = self.next_sent().await.as_request().unwrap().clone();
        assert_eq!(invite.method(), Some(SipMethod::Invite));

        let ok = ResponseBuilder::ok()
            .to_tag("callee")
            .build_for_request(&invite)
            .unwrap();
        self.push(SipMessage::Response(ok)).await;

        let ack = self.next_sent().await.as_request().unwrap().clone();
        assert_eq!(ack.method(), Some(SipMethod::Ack));
        assert_eq!(self.next_event().await, "established");
        invite
    }
}

fn wire(message: &SipMessage) -> String {
    String::from_utf8(message.to_bytes().to_vec()).unwrap()
}

fn incoming_invite(call_id: &str, caller: &str) -> SipMessage {
    let data = format!(
        "INVITE sip:lglossman@127.0.0.1:5060 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bKremote\r\n\
         From: <sip:{caller}@iptel.org>;tag=remotetag\r\n\
         To: <sip:lglossman@iptel.org>\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 1 INVITE\r\n\
         Contact: <sip:{caller}@192.0.2.1:5060>\r\n\
         Content-Length: 0\r\n\r\n"
    );
    SipMessage::Request(SipRequest::parse(data.as_bytes()).unwrap())
}

#[tokio::test]
async fn test_registration_happy_path() {
    let mut h = Harness::new();
    let register = h.register().await;

    let text = wire(&SipMessage::Request(register));
    assert!(text.starts_with("REGISTER sip:iptel.org SIP/2.0"));
    assert!(text.contains("From: <sip:lglossman@iptel.org>"));
}

#[tokio::test]
async fn test_registration_answers_digest_challenge() {
    let mut h = Harness::new();
    h.handle
        .connect("iptel.org", "lglossman", "qwerty")
        .await
        .unwrap();
    assert_eq!(h.next_event().await, "connecting");

    let first = h.next_sent().await.as_request().unwrap().clone();
    let challenge = ResponseBuilder::new(401)
        .header(Header::WwwAuthenticate(
            r#"Digest realm="iptel.org", nonce="f1e2d3", algorithm=MD5, qop="auth""#.into(),
        ))
        .build_for_request(&first)
        .unwrap();
    h.push(SipMessage::Response(challenge)).await;

    let second = h.next_sent().await.as_request().unwrap().clone();
    let text = wire(&SipMessage::Request(second.clone()));
    assert!(text.contains("Authorization: Digest username=\"lglossman\""));
    assert!(text.contains("nonce=\"f1e2d3\""));

    let ok = ResponseBuilder::ok().build_for_request(&second).unwrap();
    h.push(SipMessage::Response(ok)).await;
    assert_eq!(h.next_event().await, "success");
}

#[tokio::test]
async fn test_registration_rejection_fails_without_retry() {
    let mut h = Harness::new();
    h.handle
        .connect("iptel.org", "lglossman", "wrong")
        .await
        .unwrap();
    assert_eq!(h.next_event().await, "connecting");

    let register = h.next_sent().await.as_request().unwrap().clone();
    let forbidden = ResponseBuilder::new(403).build_for_request(&register).unwrap();
    h.push(SipMessage::Response(forbidden)).await;
    assert_eq!(h.next_event().await, "failed");

    // Calls are refused until a fresh connect succeeds
    let result = h.handle.make_call("zgroup").await;
    assert!(matches!(result, Err(DomainError::NotRegistered)));
}

#[tokio::test]
async fn test_registration_timeout() {
    let config = SipConfig {
        register_timeout_secs: 1,
        ..SipConfig::default()
    };
    let mut h = Harness::with_config(config);

    h.handle
        .connect("iptel.org", "lglossman", "qwerty")
        .await
        .unwrap();
    assert_eq!(h.next_event().await, "connecting");
    let _register = h.next_sent().await;

    // Server never answers
    assert_eq!(h.next_event().await, "failed");
}

#[tokio::test]
async fn test_registration_renews_before_expiry() {
    let mut h = Harness::new();
    h.handle
        .connect("iptel.org", "lglossman", "qwerty")
        .await
        .unwrap();
    assert_eq!(h.next_event().await, "connecting");

    let register = h.next_sent().await.as_request().unwrap().clone();
    // A one-second grant forces a near-immediate renewal
    let ok = ResponseBuilder::ok()
        .header(Header::Expires("1".into()))
        .build_for_request(&register)
        .unwrap();
    h.push(SipMessage::Response(ok)).await;
    assert_eq!(h.next_event().await, "success");

    let renewal = h.next_sent().await.as_request().unwrap().clone();
    assert_eq!(renewal.method(), Some(SipMethod::Register));
    assert_eq!(renewal.call_id(), register.call_id());
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let mut h = Harness::new();
    h.register().await;

    let result = h.handle.connect("iptel.org", "lglossman", "qwerty").await;
    assert!(matches!(result, Err(DomainError::AlreadyRegistered)));
}

#[tokio::test]
async fn test_outbound_call_lifecycle() {
    let mut h = Harness::new();
    h.register().await;
    h.establish_outbound("zgroup").await;

    tokio_test::assert_ok!(h.handle.end_current_call().await);
    let bye = h.next_sent().await.as_request().unwrap().clone();
    assert_eq!(bye.method(), Some(SipMethod::Bye));
    assert_eq!(h.next_event().await, "ended");
}

#[tokio::test]
async fn test_outbound_call_busy() {
    let mut h = Harness::new();
    h.register().await;

    h.handle.make_call("zgroup").await.unwrap();
    let invite = h.next_sent().await.as_request().unwrap().clone();

    let busy = ResponseBuilder::busy_here().build_for_request(&invite).unwrap();
    h.push(SipMessage::Response(busy)).await;

    let ack = h.next_sent().await.as_request().unwrap().clone();
    assert_eq!(ack.method(), Some(SipMethod::Ack));
    assert_eq!(h.next_event().await, "ended");
}

#[tokio::test]
async fn test_outbound_call_canceled_before_answer() {
    let mut h = Harness::new();
    h.register().await;

    h.handle.make_call("zgroup").await.unwrap();
    let _invite = h.next_sent().await;

    h.handle.end_current_call().await.unwrap();
    let cancel = h.next_sent().await.as_request().unwrap().clone();
    assert_eq!(cancel.method(), Some(SipMethod::Cancel));
    assert_eq!(h.next_event().await, "ended");
}

#[tokio::test]
async fn test_incoming_call_taken_and_peer_hangs_up() {
    let mut h = Harness::new();
    h.register().await;

    h.push(incoming_invite("in1@iptel.org", "zgroup")).await;
    let ringing = h.next_sent().await;
    assert!(wire(&ringing).starts_with("SIP/2.0 180"));
    assert_eq!(h.next_event().await, "incoming:zgroup");

    h.handle.take_incoming_call().await.unwrap();
    let answer = h.next_sent().await;
    assert!(wire(&answer).starts_with("SIP/2.0 200"));
    assert_eq!(h.next_event().await, "established");

    let bye = SipRequest::parse(
        "BYE sip:lglossman@127.0.0.1:5060 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bKbye\r\n\
         From: <sip:zgroup@iptel.org>;tag=remotetag\r\n\
         To: <sip:lglossman@iptel.org>;tag=us\r\n\
         Call-ID: in1@iptel.org\r\n\
         CSeq: 2 BYE\r\n\
         Content-Length: 0\r\n\r\n"
            .as_bytes(),
    )
    .unwrap();
    h.push(SipMessage::Request(bye)).await;

    let confirm = h.next_sent().await;
    assert!(wire(&confirm).starts_with("SIP/2.0 200"));
    assert_eq!(h.next_event().await, "ended");
}

#[tokio::test]
async fn test_incoming_call_rejected() {
    let mut h = Harness::new();
    h.register().await;

    h.push(incoming_invite("in1@iptel.org", "zgroup")).await;
    let _ringing = h.next_sent().await;
    assert_eq!(h.next_event().await, "incoming:zgroup");

    h.handle.reject_incoming_call().await.unwrap();
    let decline = h.next_sent().await;
    assert!(wire(&decline).starts_with("SIP/2.0 603"));
    assert_eq!(h.next_event().await, "ended");

    // Nothing pending afterwards
    let result = h.handle.reject_incoming_call().await;
    assert!(matches!(result, Err(DomainError::NoPendingCall)));
}

#[tokio::test]
async fn test_take_without_pending_call_fails() {
    let mut h = Harness::new();
    h.register().await;

    let result = h.handle.take_incoming_call().await;
    assert!(matches!(result, Err(DomainError::NoPendingCall)));
}

#[tokio::test]
async fn test_second_incoming_call_gets_busy() {
    let mut h = Harness::new();
    h.register().await;

    h.push(incoming_invite("in1@iptel.org", "zgroup")).await;
    let _ringing = h.next_sent().await;
    assert_eq!(h.next_event().await, "incoming:zgroup");

    h.push(incoming_invite("in2@iptel.org", "mallory")).await;
    let busy = h.next_sent().await;
    assert!(wire(&busy).starts_with("SIP/2.0 486"));

    // No event for the rejected second caller; the handle still works and
    // the first call is still answerable.
    h.handle.take_incoming_call().await.unwrap();
    let answer = h.next_sent().await;
    assert!(wire(&answer).starts_with("SIP/2.0 200"));
    assert_eq!(h.next_event().await, "established");
}

#[tokio::test]
async fn test_invite_while_unregistered_is_refused() {
    let mut h = Harness::new();

    h.push(incoming_invite("in1@iptel.org", "zgroup")).await;
    let refusal = h.next_sent().await;
    assert!(wire(&refusal).starts_with("SIP/2.0 480"));

    // And no incoming-call event was raised
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_taking_waiting_call_ends_current() {
    let mut h = Harness::new();
    h.register().await;
    h.establish_outbound("zgroup").await;

    h.push(incoming_invite("in2@iptel.org", "mallory")).await;
    let _ringing = h.next_sent().await;
    assert_eq!(h.next_event().await, "incoming:mallory");

    h.handle.take_incoming_call().await.unwrap();
    let bye = h.next_sent().await.as_request().unwrap().clone();
    assert_eq!(bye.method(), Some(SipMethod::Bye));
    assert_eq!(h.next_event().await, "ended");

    let answer = h.next_sent().await;
    assert!(wire(&answer).starts_with("SIP/2.0 200"));
    assert_eq!(h.next_event().await, "established");
}

#[tokio::test]
async fn test_disconnect_tears_everything_down() {
    let mut h = Harness::new();
    h.register().await;
    h.establish_outbound("zgroup").await;

    tokio_test::assert_ok!(h.handle.disconnect().await);

    let bye = h.next_sent().await.as_request().unwrap().clone();
    assert_eq!(bye.method(), Some(SipMethod::Bye));
    assert_eq!(h.next_event().await, "ended");

    let deregister = h.next_sent().await.as_request().unwrap().clone();
    assert_eq!(deregister.method(), Some(SipMethod::Register));
    assert!(wire(&SipMessage::Request(deregister)).contains("Expires: 0"));

    // Fully signed off
    let result = h.handle.make_call("zgroup").await;
    assert!(matches!(result, Err(DomainError::NotRegistered)));
}

#[tokio::test]
async fn test_speaker_mode_accepted_during_call() {
    let mut h = Harness::new();
    h.register().await;
    h.establish_outbound("zgroup").await;

    tokio_test::assert_ok!(h.handle.set_speaker_mode(true).await);
    tokio_test::assert_ok!(h.handle.set_speaker_mode(false).await);
}

#[tokio::test]
async fn test_connect_rejects_empty_credentials() {
    let h = Harness::new();

    let result = h.handle.connect("", "lglossman", "qwerty").await;
    assert!(matches!(result, Err(DomainError::InvalidArgument(_))));

    let result = h.handle.connect("iptel.org", "", "qwerty").await;
    assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
}
