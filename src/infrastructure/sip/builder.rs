//! SIP message builder utilities
//!
//! Client-side builders for the requests a user agent originates
//! (REGISTER, INVITE, ACK, CANCEL, BYE) and the responses it returns
//! for inbound requests.

use super::message::{SipError, SipRequest, SipResponse};
use crate::domain::account::Account;
use crate::domain::shared::value_objects::SipUri;
use rand::Rng;
use rsip::{Header, Headers, Method, Request, Response, StatusCode, Uri, Version};
use std::net::SocketAddr;

/// RFC 3261 branch magic cookie
const BRANCH_COOKIE: &str = "z9hG4bK";

fn random_token(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    let random: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    hex::encode(random)
}

/// Generate a Via branch parameter
pub fn new_branch() -> String {
    format!("{}{}", BRANCH_COOKIE, random_token(8))
}

/// Generate a From/To tag
pub fn new_tag() -> String {
    random_token(6)
}

/// Generate a Call-ID scoped to the given host
pub fn new_call_id(host: &str) -> String {
    format!("{}@{}", random_token(12), host)
}

fn via_header(local_addr: SocketAddr) -> Header {
    Header::Via(format!("SIP/2.0/UDP {};branch={}", local_addr, new_branch()).into())
}

fn contact_header(user: &str, local_addr: SocketAddr) -> Header {
    Header::Contact(format!("<sip:{}@{}>", user, local_addr).into())
}

fn base_headers(
    local_addr: SocketAddr,
    from_value: String,
    to_value: String,
    call_id: &str,
    cseq: u32,
    method: Method,
) -> Vec<Header> {
    vec![
        via_header(local_addr),
        Header::MaxForwards("70".into()),
        Header::From(from_value.into()),
        Header::To(to_value.into()),
        Header::CallId(call_id.into()),
        Header::CSeq(format!("{} {}", cseq, method).into()),
    ]
}

fn finish_request(method: Method, uri: Uri, mut headers: Vec<Header>) -> SipRequest {
    headers.push(Header::ContentLength("0".into()));
    SipRequest::new(Request {
        method,
        uri,
        version: Version::V2,
        headers: Headers::from(headers),
        body: Vec::new(),
    })
}

/// Build a REGISTER request for the account.
///
/// `expires` of zero de-registers the binding.
pub fn register_request(
    account: &Account,
    local_addr: SocketAddr,
    call_id: &str,
    from_tag: &str,
    cseq: u32,
    expires: u32,
    authorization: Option<&str>,
) -> Result<SipRequest, SipError> {
    let uri = Uri::try_from(format!("sip:{}", account.domain()).as_str())?;
    let aor = account.uri().to_string();

    let mut headers = base_headers(
        local_addr,
        format!("<{}>;tag={}", aor, from_tag),
        format!("<{}>", aor),
        call_id,
        cseq,
        Method::Register,
    );
    headers.push(contact_header(account.username(), local_addr));
    headers.push(Header::Expires(expires.to_string().into()));
    if let Some(auth) = authorization {
        headers.push(Header::Authorization(auth.into()));
    }

    Ok(finish_request(Method::Register, uri, headers))
}

/// Build an INVITE toward the peer.
pub fn invite_request(
    account: &Account,
    peer: &SipUri,
    local_addr: SocketAddr,
    call_id: &str,
    from_tag: &str,
    cseq: u32,
    authorization: Option<&str>,
) -> Result<SipRequest, SipError> {
    let uri = Uri::try_from(peer.to_string().as_str())?;

    let mut headers = base_headers(
        local_addr,
        format!("<{}>;tag={}", account.uri(), from_tag),
        format!("<{}>", peer),
        call_id,
        cseq,
        Method::Invite,
    );
    headers.push(contact_header(account.username(), local_addr));
    if let Some(auth) = authorization {
        headers.push(Header::Authorization(auth.into()));
    }

    Ok(finish_request(Method::Invite, uri, headers))
}

/// Build the ACK for a final INVITE response.
///
/// From mirrors our invite; To is taken from the response so the peer's
/// tag is carried back.
pub fn ack_for(
    invite: &SipRequest,
    response: &SipResponse,
    local_addr: SocketAddr,
) -> Result<SipRequest, SipError> {
    let from = invite
        .from_value()
        .ok_or_else(|| SipError::InvalidMessage("invite missing From".to_string()))?;
    let to = response
        .to_value()
        .or_else(|| invite.to_value())
        .ok_or_else(|| SipError::InvalidMessage("response missing To".to_string()))?;
    let call_id = invite
        .call_id()
        .ok_or_else(|| SipError::InvalidMessage("invite missing Call-ID".to_string()))?;
    let cseq = invite
        .cseq_seq()
        .ok_or_else(|| SipError::InvalidMessage("invite missing CSeq".to_string()))?;

    let headers = base_headers(local_addr, from, to, &call_id, cseq, Method::Ack);
    Ok(finish_request(Method::Ack, invite.uri().clone(), headers))
}

/// Build a CANCEL for a pending INVITE.
///
/// Via, From, To and Call-ID are copied verbatim from the invite; CSeq
/// keeps the sequence number with the CANCEL method.
pub fn cancel_for(invite: &SipRequest) -> Result<SipRequest, SipError> {
    let mut headers = Vec::new();
    for header in invite.headers().iter() {
        match header {
            Header::Via(_) | Header::From(_) | Header::To(_) | Header::CallId(_) => {
                headers.push(header.clone());
            }
            _ => {}
        }
    }

    let cseq = invite
        .cseq_seq()
        .ok_or_else(|| SipError::InvalidMessage("invite missing CSeq".to_string()))?;
    headers.push(Header::MaxForwards("70".into()));
    headers.push(Header::CSeq(format!("{} {}", cseq, Method::Cancel).into()));

    Ok(finish_request(Method::Cancel, invite.uri().clone(), headers))
}

/// Build a BYE for an established dialog.
pub fn bye_request(
    peer: &SipUri,
    local_from: &str,
    remote_to: &str,
    call_id: &str,
    cseq: u32,
    local_addr: SocketAddr,
) -> Result<SipRequest, SipError> {
    let uri = Uri::try_from(peer.to_string().as_str())?;
    let headers = base_headers(
        local_addr,
        local_from.to_string(),
        remote_to.to_string(),
        call_id,
        cseq,
        Method::Bye,
    );
    Ok(finish_request(Method::Bye, uri, headers))
}

/// Build a SIP response from an inbound request
pub struct ResponseBuilder {
    status_code: u16,
    to_tag: Option<String>,
    contact: Option<Header>,
    headers: Vec<Header>,
}

impl ResponseBuilder {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            to_tag: None,
            contact: None,
            headers: Vec::new(),
        }
    }

    pub fn ringing() -> Self {
        Self::new(180)
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn temporarily_unavailable() -> Self {
        Self::new(480)
    }

    pub fn call_does_not_exist() -> Self {
        Self::new(481)
    }

    pub fn busy_here() -> Self {
        Self::new(486)
    }

    pub fn decline() -> Self {
        Self::new(603)
    }

    /// Tag appended to the copied To header, identifying our dialog leg
    pub fn to_tag(mut self, tag: &str) -> Self {
        self.to_tag = Some(tag.to_string());
        self
    }

    pub fn contact(mut self, user: &str, local_addr: SocketAddr) -> Self {
        self.contact = Some(contact_header(user, local_addr));
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn build_for_request(mut self, request: &SipRequest) -> Result<SipResponse, SipError> {
        // Copy essential headers from the request
        for header in request.headers().iter() {
            match header {
                Header::Via(_) | Header::From(_) | Header::CallId(_) | Header::CSeq(_) => {
                    self.headers.push(header.clone());
                }
                Header::To(_) => {
                    let to = request
                        .to_value()
                        .ok_or_else(|| SipError::InvalidMessage("missing To".to_string()))?;
                    let to = match &self.to_tag {
                        Some(tag) if !to.contains("tag=") => format!("{};tag={}", to, tag),
                        _ => to,
                    };
                    self.headers.push(Header::To(to.into()));
                }
                _ => {}
            }
        }

        if let Some(contact) = self.contact.take() {
            self.headers.push(contact);
        }
        self.headers.push(Header::ContentLength("0".into()));

        let response = Response {
            status_code: StatusCode::from(self.status_code),
            headers: Headers::from(self.headers),
            body: Vec::new(),
            version: Version::V2,
        };

        Ok(SipResponse::new(response))
    }
}
