//! SIP Digest Authentication, client side (RFC 2617, RFC 3261)
//!
//! Parses a WWW-Authenticate/Proxy-Authenticate challenge and computes the
//! Authorization header a user agent sends back.

use super::message::SipError;
use rand::Rng;
use std::collections::HashMap;
use tracing::debug;

/// Parsed digest challenge from a 401/407 response
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub algorithm: Option<String>,
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

impl DigestChallenge {
    /// Parse a header value such as
    /// `Digest realm="iptel.org", nonce="abc", algorithm=MD5, qop="auth"`
    pub fn parse(header_value: &str) -> Result<Self, SipError> {
        let rest = header_value
            .trim()
            .strip_prefix("Digest")
            .ok_or_else(|| SipError::Authentication("not a Digest challenge".to_string()))?;

        let params = parse_digest_params(rest);
        debug!(?params, "parsed digest challenge");

        Ok(Self {
            realm: params
                .get("realm")
                .cloned()
                .ok_or_else(|| SipError::Authentication("missing realm in challenge".to_string()))?,
            nonce: params
                .get("nonce")
                .cloned()
                .ok_or_else(|| SipError::Authentication("missing nonce in challenge".to_string()))?,
            algorithm: params.get("algorithm").cloned(),
            qop: params.get("qop").cloned(),
            opaque: params.get("opaque").cloned(),
        })
    }

    /// Whether the challenge asks for the auth quality-of-protection
    fn wants_qop_auth(&self) -> bool {
        self.qop
            .as_deref()
            .map(|qop| qop.split(',').any(|q| q.trim() == "auth"))
            .unwrap_or(false)
    }
}

/// Split comma-separated `key=value` parameters, respecting quoted values
fn parse_digest_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut in_quotes = false;
    let mut start = 0;
    let bytes = input.as_bytes();

    let mut push = |piece: &str, params: &mut HashMap<String, String>| {
        if let Some((key, value)) = piece.split_once('=') {
            params.insert(
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    };

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                push(&input[start..i], &mut params);
                start = i + 1;
            }
            _ => {}
        }
    }
    push(&input[start..], &mut params);

    params
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Compute the digest response value. Exposed with explicit `nc`/`cnonce`
/// so the arithmetic is testable against the RFC worked example.
pub fn compute_response(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    nc: &str,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    if challenge.wants_qop_auth() {
        md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, challenge.nonce, nc, cnonce, ha2
        ))
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    }
}

/// Build the Authorization header value answering a challenge.
pub fn authorization_header(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
) -> String {
    let nc = "00000001";
    let cnonce = {
        let mut rng = rand::thread_rng();
        let random: Vec<u8> = (0..8).map(|_| rng.gen()).collect();
        hex::encode(random)
    };

    let response = compute_response(challenge, username, password, method, uri, nc, &cnonce);
    let algorithm = challenge.algorithm.as_deref().unwrap_or("MD5");

    let mut header = format!(
        r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}", algorithm={}"#,
        username, challenge.realm, challenge.nonce, uri, response, algorithm
    );
    if challenge.wants_qop_auth() {
        header.push_str(&format!(r#", qop=auth, nc={}, cnonce="{}""#, nc, cnonce));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(r#", opaque="{}""#, opaque));
    }

    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="iptel.org", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c6", algorithm=MD5, qop="auth,auth-int""#,
        )
        .unwrap();

        assert_eq!(challenge.realm, "iptel.org");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c6");
        assert_eq!(challenge.algorithm.as_deref(), Some("MD5"));
        assert!(challenge.wants_qop_auth());
    }

    #[test]
    fn test_parse_rejects_non_digest() {
        assert!(DigestChallenge::parse("Basic realm=\"x\"").is_err());
        assert!(DigestChallenge::parse("Digest nonce=\"x\"").is_err());
    }

    #[test]
    fn test_rfc2617_worked_example() {
        let challenge = DigestChallenge {
            realm: "testrealm@host.com".to_string(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".to_string(),
            algorithm: Some("MD5".to_string()),
            qop: Some("auth".to_string()),
            opaque: None,
        };

        let response = compute_response(
            &challenge,
            "Mufasa",
            "Circle Of Life",
            "GET",
            "/dir/index.html",
            "00000001",
            "0a4f113b",
        );

        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_response_without_qop() {
        let challenge = DigestChallenge {
            realm: "iptel.org".to_string(),
            nonce: "abc123".to_string(),
            algorithm: None,
            qop: None,
            opaque: None,
        };

        // md5(md5(user:realm:pass):nonce:md5(method:uri))
        let ha1 = md5_hex("lglossman:iptel.org:qwerty");
        let ha2 = md5_hex("REGISTER:sip:iptel.org");
        let expected = md5_hex(&format!("{}:abc123:{}", ha1, ha2));

        let response = compute_response(
            &challenge,
            "lglossman",
            "qwerty",
            "REGISTER",
            "sip:iptel.org",
            "00000001",
            "ignored",
        );
        assert_eq!(response, expected);
    }

    #[test]
    fn test_authorization_header_format() {
        let challenge = DigestChallenge {
            realm: "iptel.org".to_string(),
            nonce: "abc123".to_string(),
            algorithm: Some("MD5".to_string()),
            qop: Some("auth".to_string()),
            opaque: Some("opq".to_string()),
        };

        let header =
            authorization_header(&challenge, "lglossman", "qwerty", "REGISTER", "sip:iptel.org");

        assert!(header.starts_with("Digest username=\"lglossman\""));
        assert!(header.contains(r#"realm="iptel.org""#));
        assert!(header.contains(r#"uri="sip:iptel.org""#));
        assert!(header.contains("qop=auth"));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains(r#"opaque="opq""#));
    }
}
