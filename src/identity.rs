//! Credentials and the identity derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Username and password supplied by the caller.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reject empty usernames or passwords.
    ///
    /// An empty password would turn into an unauthenticated bind, which most
    /// servers accept.
    pub fn check(&self) -> Result<()> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Identity echoed back to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIdentity {
    pub local_username: String,
    pub domain: Option<String>,
    pub email: Option<String>,
}

impl NormalizedIdentity {
    /// Strip any `@domain` suffix from `username`.
    ///
    /// A configured `default_domain` always wins over the suffix.
    pub fn derive(username: &str, default_domain: Option<&str>) -> Self {
        let (local_username, suffix) = match username.split_once('@') {
            Some((local, suffix)) => (local, Some(suffix)),
            None => (username, None),
        };

        let domain = default_domain.or(suffix).map(str::to_owned);
        let email = domain
            .as_ref()
            .map(|domain| format!("{local_username}@{domain}"));

        Self {
            local_username: local_username.to_owned(),
            domain,
            email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_becomes_domain() {
        let identity = NormalizedIdentity::derive("alice@corp.com", None);

        assert_eq!(identity.local_username, "alice");
        assert_eq!(identity.domain.as_deref(), Some("corp.com"));
        assert_eq!(identity.email.as_deref(), Some("alice@corp.com"));
    }

    #[test]
    fn test_default_domain_wins() {
        let identity = NormalizedIdentity::derive("alice@corp.com", Some("example.org"));

        assert_eq!(identity.local_username, "alice");
        assert_eq!(identity.domain.as_deref(), Some("example.org"));
        assert_eq!(identity.email.as_deref(), Some("alice@example.org"));

        let identity = NormalizedIdentity::derive("bob", Some("example.org"));
        assert_eq!(identity.local_username, "bob");
        assert_eq!(identity.email.as_deref(), Some("bob@example.org"));
    }

    #[test]
    fn test_no_domain_no_email() {
        let identity = NormalizedIdentity::derive("bob", None);

        assert_eq!(identity.local_username, "bob");
        assert_eq!(identity.domain, None);
        assert_eq!(identity.email, None);
    }

    #[test]
    fn test_split_on_first_at() {
        let identity = NormalizedIdentity::derive("a@b@c", None);

        assert_eq!(identity.local_username, "a");
        assert_eq!(identity.domain.as_deref(), Some("b@c"));
    }

    #[test]
    fn test_derive_is_idempotent() {
        let cases = [
            ("alice@corp.com", None),
            ("alice@corp.com", Some("example.org")),
            ("bob", Some("example.org")),
            ("bob", None),
        ];

        for (username, default_domain) in cases {
            let first = NormalizedIdentity::derive(username, default_domain);
            let raw = match &first.domain {
                Some(domain) => format!("{}@{}", first.local_username, domain),
                None => first.local_username.clone(),
            };
            let second = NormalizedIdentity::derive(&raw, default_domain);

            assert_eq!(first, second, "{username} is not stable");
        }
    }

    #[test]
    fn test_empty_credentials() {
        assert!(matches!(
            Credentials::new("", "secret").check(),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            Credentials::new("alice", "").check(),
            Err(AuthError::MissingCredentials)
        ));
        assert!(Credentials::new("alice", "secret").check().is_ok());
    }

    #[test]
    fn test_password_not_in_debug() {
        let debug = format!("{:?}", Credentials::new("alice", "hunter2"));

        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
