//! Account entity

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SipUri;

/// Registration identity: domain, username and credential.
///
/// Created on `connect` and dropped on `disconnect`. Immutable once built,
/// so a successful registration can never observe a half-updated account.
#[derive(Debug, Clone)]
pub struct Account {
    domain: String,
    username: String,
    credential: String,
}

impl Account {
    pub fn new(domain: &str, username: &str, credential: &str) -> Result<Self> {
        if domain.trim().is_empty() {
            return Err(DomainError::InvalidArgument("empty domain".to_string()));
        }
        if username.trim().is_empty() {
            return Err(DomainError::InvalidArgument("empty username".to_string()));
        }
        if credential.trim().is_empty() {
            return Err(DomainError::InvalidArgument("empty credential".to_string()));
        }

        Ok(Self {
            domain: domain.trim().to_string(),
            username: username.trim().to_string(),
            credential: credential.to_string(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Address-of-record for this account
    pub fn uri(&self) -> SipUri {
        SipUri::new(self.username.clone(), self.domain.clone(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_requires_all_fields() {
        assert!(Account::new("", "lglossman", "qwerty").is_err());
        assert!(Account::new("iptel.org", "", "qwerty").is_err());
        assert!(Account::new("iptel.org", "lglossman", "").is_err());
        assert!(Account::new("   ", "lglossman", "qwerty").is_err());
    }

    #[test]
    fn test_account_uri() {
        let account = Account::new("iptel.org", "lglossman", "qwerty").unwrap();
        assert_eq!(account.uri().to_string(), "sip:lglossman@iptel.org");
    }

    #[test]
    fn test_account_trims_identity_fields() {
        let account = Account::new(" iptel.org ", " lglossman ", "qwerty").unwrap();
        assert_eq!(account.domain(), "iptel.org");
        assert_eq!(account.username(), "lglossman");
    }
}
