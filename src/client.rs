//! Interface for directory operations.
//!
//! The authenticator only talks to the directory through these traits, so the
//! wire protocol stays in the adapter (see [`crate::ldap`]).

use std::collections::HashMap;

use async_trait::async_trait;
use url::Url;

/// LDAP result code `other`, used when a failure has no server result code.
pub const LDAP_OTHER: u32 = 80;
/// LDAP result code `sizeLimitExceeded`.
pub const LDAP_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Error reported by a directory client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ProtocolError {
    /// LDAP result code.
    pub code: u32,
    /// Diagnostic text sent by the server, or the transport error.
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error without a server result code.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(LDAP_OTHER, message)
    }
}

/// TLS parameters for secure (`ldaps://`) connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM encoded CA certificate to trust.
    pub ca_certificate: Option<Vec<u8>>,
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// Parameters of one search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub scope: SearchScope,
    pub size_limit: i32,
    pub attributes: Vec<String>,
    pub filter: String,
}

/// Directory entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Distinguished name (the entry's `objectName`).
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

/// Factory opening one connection per authentication call.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    type Connection: DirectoryConnection;

    /// Open a connection to `endpoint`.
    async fn connect(
        &self,
        endpoint: &Url,
        tls: &TlsOptions,
    ) -> Result<Self::Connection, ProtocolError>;
}

/// An open directory connection.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind.
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), ProtocolError>;

    /// Start a search. Entries are pulled lazily from the returned stream.
    async fn search(
        &mut self,
        base: &str,
        request: &SearchRequest,
    ) -> Result<Box<dyn EntryStream>, ProtocolError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), ProtocolError>;
}

/// Finite, non restartable sequence of search entries.
#[async_trait]
pub trait EntryStream: Send {
    /// Next entry, `None` once the server signalled the end of the search.
    async fn next_entry(&mut self) -> Result<Option<Entry>, ProtocolError>;

    /// Collect the final result of the search.
    async fn finish(&mut self) -> Result<(), ProtocolError>;
}

/// Read the first entry of a size limited search and drain the rest.
///
/// A `sizeLimitExceeded` final result is not an error here: the first entry
/// is enough.
pub async fn first_entry(
    stream: &mut dyn EntryStream,
) -> Result<Option<Entry>, ProtocolError> {
    let first = stream.next_entry().await?;

    if first.is_some() {
        while stream.next_entry().await?.is_some() {}
    }

    match stream.finish().await {
        Err(err) if err.code == LDAP_SIZE_LIMIT_EXCEEDED => Ok(first),
        Err(err) => Err(err),
        Ok(()) => Ok(first),
    }
}
