//! SIP message types and parsing

use bytes::Bytes;
use rsip::{Header, Headers, Method, Request, Response, Uri};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SipError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Authentication error: {0}")]
    Authentication(String),
}

impl From<rsip::Error> for SipError {
    fn from(err: rsip::Error) -> Self {
        SipError::ParseError(err.to_string())
    }
}

impl From<SipError> for crate::domain::shared::error::DomainError {
    fn from(err: SipError) -> Self {
        use crate::domain::shared::error::DomainError;
        match err {
            SipError::TransportError(e) => DomainError::Transport(e),
            SipError::Authentication(e) => DomainError::AuthFailure(e),
            SipError::ParseError(e) | SipError::InvalidMessage(e) => {
                DomainError::InvalidArgument(e)
            }
        }
    }
}

/// SIP methods this user agent speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Register,
    Invite,
    Ack,
    Cancel,
    Bye,
}

impl SipMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Register => "REGISTER",
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Bye => "BYE",
        }
    }

    pub fn from_rsip(method: &Method) -> Option<Self> {
        match method {
            Method::Register => Some(SipMethod::Register),
            Method::Invite => Some(SipMethod::Invite),
            Method::Ack => Some(SipMethod::Ack),
            Method::Cancel => Some(SipMethod::Cancel),
            Method::Bye => Some(SipMethod::Bye),
            _ => None,
        }
    }

    pub fn to_rsip(&self) -> Method {
        match self {
            SipMethod::Register => Method::Register,
            SipMethod::Invite => Method::Invite,
            SipMethod::Ack => Method::Ack,
            SipMethod::Cancel => Method::Cancel,
            SipMethod::Bye => Method::Bye,
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strip the "Name: " prefix rsip's untyped headers include in Display output
fn strip_header_name(value: String, name: &str) -> String {
    let prefix = format!("{}: ", name);
    value
        .strip_prefix(&prefix)
        .map(|v| v.to_string())
        .unwrap_or(value)
}

/// Extract the user part of a From/To header value,
/// e.g. `"Bob" <sip:bob@iptel.org>;tag=abc` -> `bob`
pub fn user_from_header(value: &str) -> Option<String> {
    let start = value.find("sip:")? + 4;
    let rest = &value[start..];
    let end = rest.find('@')?;
    if end == 0 {
        return None;
    }
    Some(rest[..end].to_string())
}

/// SIP Request wrapper
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub inner: Request,
}

impl SipRequest {
    pub fn new(inner: Request) -> Self {
        Self { inner }
    }

    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let request = rsip::Request::try_from(data)?;
        Ok(Self::new(request))
    }

    pub fn method(&self) -> Option<SipMethod> {
        SipMethod::from_rsip(&self.inner.method)
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn call_id(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::CallId(cid) => Some(strip_header_name(cid.to_string(), "Call-ID")),
            _ => None,
        })
    }

    pub fn from_value(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::From(from) => Some(strip_header_name(from.to_string(), "From")),
            _ => None,
        })
    }

    pub fn to_value(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::To(to) => Some(strip_header_name(to.to_string(), "To")),
            _ => None,
        })
    }

    pub fn via_value(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::Via(via) => Some(strip_header_name(via.to_string(), "Via")),
            _ => None,
        })
    }

    pub fn cseq_seq(&self) -> Option<u32> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::CSeq(cseq) => {
                let value = strip_header_name(cseq.to_string(), "CSeq");
                value.split_whitespace().next()?.parse().ok()
            }
            _ => None,
        })
    }

    /// Caller identity (user part of the From header)
    pub fn caller_id(&self) -> Option<String> {
        self.from_value().as_deref().and_then(user_from_header)
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.inner.to_string())
    }
}

/// SIP Response wrapper
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub inner: Response,
}

impl SipResponse {
    pub fn new(inner: Response) -> Self {
        Self { inner }
    }

    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let response = rsip::Response::try_from(data)?;
        Ok(Self::new(response))
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status_code.clone().into()
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    pub fn call_id(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::CallId(cid) => Some(strip_header_name(cid.to_string(), "Call-ID")),
            _ => None,
        })
    }

    pub fn to_value(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::To(to) => Some(strip_header_name(to.to_string(), "To")),
            _ => None,
        })
    }

    pub fn from_value(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::From(from) => Some(strip_header_name(from.to_string(), "From")),
            _ => None,
        })
    }

    pub fn cseq_seq(&self) -> Option<u32> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::CSeq(cseq) => {
                let value = strip_header_name(cseq.to_string(), "CSeq");
                value.split_whitespace().next()?.parse().ok()
            }
            _ => None,
        })
    }

    /// Granted registration expiry, if the server reported one
    pub fn expires(&self) -> Option<u32> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::Expires(exp) => strip_header_name(exp.to_string(), "Expires").parse().ok(),
            _ => None,
        })
    }

    /// Digest challenge value from a 401/407 response
    pub fn auth_challenge(&self) -> Option<String> {
        self.inner.headers.iter().find_map(|h| match h {
            Header::WwwAuthenticate(auth) => {
                Some(strip_header_name(auth.to_string(), "WWW-Authenticate"))
            }
            Header::ProxyAuthenticate(auth) => {
                Some(strip_header_name(auth.to_string(), "Proxy-Authenticate"))
            }
            _ => None,
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.inner.to_string())
    }
}

/// SIP Message (either request or response)
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        // Responses start with the protocol version; requests with a method
        if data.starts_with(b"SIP/") {
            return Ok(SipMessage::Response(SipResponse::parse(data)?));
        }

        if let Ok(request) = SipRequest::parse(data) {
            return Ok(SipMessage::Request(request));
        }

        if let Ok(response) = SipResponse::parse(data) {
            return Ok(SipMessage::Response(response));
        }

        Err(SipError::ParseError(
            "Could not parse as SIP request or response".to_string(),
        ))
    }

    pub fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, SipMessage::Response(_))
    }

    pub fn as_request(&self) -> Option<&SipRequest> {
        match self {
            SipMessage::Request(req) => Some(req),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&SipResponse> {
        match self {
            SipMessage::Response(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn call_id(&self) -> Option<String> {
        match self {
            SipMessage::Request(req) => req.call_id(),
            SipMessage::Response(resp) => resp.call_id(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            SipMessage::Request(req) => req.to_bytes(),
            SipMessage::Response(resp) => resp.to_bytes(),
        }
    }
}
