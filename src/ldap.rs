//! LDAP support.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry,
    SearchOptions, SearchStream,
};
use url::Url;

use crate::client::{
    DirectoryClient, DirectoryConnection, Entry, EntryStream, ProtocolError,
    SearchRequest, SearchScope, TlsOptions,
};

impl From<LdapError> for ProtocolError {
    fn from(err: LdapError) -> Self {
        match err {
            LdapError::LdapResult { result } => {
                ProtocolError::new(result.rc, result.text)
            },
            err => ProtocolError::other(err.to_string()),
        }
    }
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

impl From<SearchEntry> for Entry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
        }
    }
}

/// [`DirectoryClient`] backed by [`ldap3`].
#[derive(Clone, Debug, Default)]
pub struct LdapClient {
    conn_timeout: Option<Duration>,
}

impl LdapClient {
    /// Create a new [`LdapClient`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort connection attempts after `timeout`.
    pub fn with_conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = Some(timeout);
        self
    }

    fn settings(&self, tls: &TlsOptions) -> Result<LdapConnSettings, ProtocolError> {
        let mut settings = LdapConnSettings::new();

        if let Some(timeout) = self.conn_timeout {
            settings = settings.set_conn_timeout(timeout);
        }

        if let Some(pem) = &tls.ca_certificate {
            let certificate = native_tls::Certificate::from_pem(pem).map_err(|err| {
                ProtocolError::other(format!("invalid CA certificate: {err}"))
            })?;
            let connector = native_tls::TlsConnector::builder()
                .add_root_certificate(certificate)
                .build()
                .map_err(|err| ProtocolError::other(err.to_string()))?;

            settings = settings.set_connector(connector);
        }

        Ok(settings)
    }
}

#[async_trait]
impl DirectoryClient for LdapClient {
    type Connection = LdapConnection;

    async fn connect(
        &self,
        endpoint: &Url,
        tls: &TlsOptions,
    ) -> Result<LdapConnection, ProtocolError> {
        let settings = self.settings(tls)?;
        let (conn, ldap) =
            LdapConnAsync::with_settings(settings, endpoint.as_str()).await?;

        // Spawn the connection driver.
        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                tracing::error!(error = %err, "LDAP connection driver failed");
            }
        });

        Ok(LdapConnection { ldap })
    }
}

/// One [`ldap3`] connection.
pub struct LdapConnection {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), ProtocolError> {
        self.ldap.simple_bind(dn, password).await?.success()?;
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        request: &SearchRequest,
    ) -> Result<Box<dyn EntryStream>, ProtocolError> {
        let stream = self
            .ldap
            .with_search_options(SearchOptions::new().sizelimit(request.size_limit))
            .streaming_search(
                base,
                request.scope.into(),
                &request.filter,
                request.attributes.clone(),
            )
            .await?;

        Ok(Box::new(LdapEntryStream { stream }))
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.ldap.unbind().await?;
        Ok(())
    }
}

struct LdapEntryStream {
    stream: SearchStream<'static, String, Vec<String>>,
}

#[async_trait]
impl EntryStream for LdapEntryStream {
    async fn next_entry(&mut self) -> Result<Option<Entry>, ProtocolError> {
        while let Some(entry) = self.stream.next().await? {
            // referrals and intermediate messages carry no entry.
            if entry.is_ref() || entry.is_intermediate() {
                continue;
            }
            return Ok(Some(SearchEntry::construct(entry).into()));
        }

        Ok(None)
    }

    async fn finish(&mut self) -> Result<(), ProtocolError> {
        self.stream.finish().await.success()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LDAP_OTHER;

    #[test]
    fn test_ldap_result_code_is_kept() {
        let err = LdapError::LdapResult {
            result: ldap3::LdapResult {
                rc: 49,
                matched: String::new(),
                text: "invalid credentials".into(),
                refs: vec![],
                ctrls: vec![],
            },
        };

        assert_eq!(
            ProtocolError::from(err),
            ProtocolError::new(49, "invalid credentials")
        );
    }

    #[test]
    fn test_transport_error_is_other() {
        let err = LdapError::from(std::io::Error::other("connection reset"));

        assert_eq!(ProtocolError::from(err).code, LDAP_OTHER);
    }

    #[test]
    fn test_invalid_ca_is_rejected() {
        let tls = TlsOptions {
            ca_certificate: Some(b"not a certificate".to_vec()),
        };

        assert!(LdapClient::new().settings(&tls).is_err());
    }
}
