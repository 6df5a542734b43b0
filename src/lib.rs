//! dirauth checks user credentials against an LDAP or Active Directory
//! server and returns a mapped subset of the user's directory attributes.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dirauth::{Authenticator, Credentials, DirectorySettings, LdapClient};
//!
//! # async fn run() -> dirauth::error::Result<()> {
//! let defaults = DirectorySettings {
//!     server_url: Some("ldap://ldap.example.com".into()),
//!     base_dn: Some("dc=example,dc=com".into()),
//!     ..Default::default()
//! };
//! let authenticator = Authenticator::new(LdapClient::new(), Arc::new(defaults));
//!
//! let result = authenticator
//!     .authenticate(
//!         &Credentials::new("alice", "secret"),
//!         DirectorySettings::default(),
//!     )
//!     .await?;
//! assert!(result.found);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod authenticator;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod ldap;
pub mod projection;
pub mod telemetry;

pub use authenticator::{AuthResult, Authenticator};
pub use config::{DirectoryConfig, DirectorySettings};
pub use error::AuthError;
pub use identity::{Credentials, NormalizedIdentity};
pub use ldap::LdapClient;
pub use projection::{AttributeMapping, AttributeValue};
