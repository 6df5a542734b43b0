//! Configuration manager for dirauth.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};
use crate::projection::{AttributeMapping, escape_filter_value};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port used when neither the URL nor the settings carry one.
pub const DEFAULT_PORT: &str = "389";
/// Filter used when none is configured.
pub const DEFAULT_SEARCH_FILTER: &str = "(objectclass=*)";

/// Errors that may occur while loading `config.yaml`.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[from] serde_yaml::Error),
}

/// Structure of the `config.yaml` file.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Process-wide directory defaults.
    #[serde(default)]
    pub directory: DirectorySettings,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> std::result::Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(&file_path) {
            Ok(file) => {
                let mut config: Configuration = serde_yaml::from_reader(file)?;

                // set app version.
                config.version = VERSION.to_owned();
                config.path = file_path;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

/// Partial directory configuration.
///
/// Used both for process-wide defaults and for per-call overrides. Any field
/// set on the overrides replaces the default one.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// `ldap://` or `ldaps://` URL of the server.
    pub server_url: Option<String>,
    /// Port appended to `server_url` when the URL has none.
    pub port: Option<String>,
    /// DN for domain. Fallback search base in discovery mode.
    pub base_dn: Option<String>,
    /// DN to bind as. Without it, the DN is discovered by search.
    pub bind_dn: Option<String>,
    /// Domain replacing any `@domain` typed by the user.
    pub default_domain: Option<String>,
    /// Active Directory domain used by the login profile.
    pub domain: Option<String>,
    pub search_filter: Option<String>,
    pub search_base: Option<String>,
    /// Attributes copied into the result.
    pub attribute_map: Option<Vec<AttributeMapping>>,
    /// PEM encoded CA trusted on `ldaps://` connections.
    #[serde(skip_serializing)]
    pub tls_certificate: Option<String>,
    /// Equality clauses narrowing the discovery search.
    pub search_constraints: Option<BTreeMap<String, String>>,
    /// Deadline for the whole connect, bind and search sequence.
    pub timeout_seconds: Option<u64>,
}

impl DirectorySettings {
    /// Settings for an Active Directory login: bind directly with the UPN
    /// and use the search for attribute enrichment only.
    pub fn active_directory(username: &str, domain: &str) -> Self {
        Self {
            bind_dn: Some(format!("{username}@{domain}")),
            search_filter: Some(format!(
                "(sAMAccountName={})",
                escape_filter_value(username)
            )),
            ..Default::default()
        }
    }

    /// Overlay `self` on `defaults`.
    pub fn merge(self, defaults: &DirectorySettings) -> DirectorySettings {
        DirectorySettings {
            server_url: self.server_url.or_else(|| defaults.server_url.clone()),
            port: self.port.or_else(|| defaults.port.clone()),
            base_dn: self.base_dn.or_else(|| defaults.base_dn.clone()),
            bind_dn: self.bind_dn.or_else(|| defaults.bind_dn.clone()),
            default_domain: self
                .default_domain
                .or_else(|| defaults.default_domain.clone()),
            domain: self.domain.or_else(|| defaults.domain.clone()),
            search_filter: self
                .search_filter
                .or_else(|| defaults.search_filter.clone()),
            search_base: self.search_base.or_else(|| defaults.search_base.clone()),
            attribute_map: self
                .attribute_map
                .or_else(|| defaults.attribute_map.clone()),
            tls_certificate: self
                .tls_certificate
                .or_else(|| defaults.tls_certificate.clone()),
            search_constraints: self
                .search_constraints
                .or_else(|| defaults.search_constraints.clone()),
            timeout_seconds: self.timeout_seconds.or(defaults.timeout_seconds),
        }
    }
}

/// Fully resolved configuration of one authentication call.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryConfig {
    pub server_url: String,
    pub port: String,
    pub base_dn: Option<String>,
    pub bind_dn: Option<String>,
    pub default_domain: Option<String>,
    pub domain: Option<String>,
    pub search_filter: String,
    pub search_base: Option<String>,
    pub attribute_map: Option<Vec<AttributeMapping>>,
    pub tls_certificate: Option<Vec<u8>>,
    pub search_constraints: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    endpoint: Url,
}

impl DirectoryConfig {
    /// URL to connect to, port included.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Whether the connection must be made over TLS.
    pub fn is_secure(&self) -> bool {
        self.endpoint.scheme() == "ldaps"
    }
}

/// Merge `overrides` over `defaults` and validate the result.
///
/// Fails before any network I/O if no usable server URL is configured.
pub fn resolve(
    overrides: DirectorySettings,
    defaults: &DirectorySettings,
) -> Result<DirectoryConfig> {
    let merged = overrides.merge(defaults);

    let server_url = merged
        .server_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| {
            AuthError::Config(
                "missing `server_url`, set it on the defaults or the call".into(),
            )
        })?;
    let port = merged
        .port
        .filter(|port| !port.is_empty())
        .unwrap_or_else(|| DEFAULT_PORT.to_owned());
    let endpoint = build_endpoint(&server_url, &port)?;

    Ok(DirectoryConfig {
        server_url,
        port,
        base_dn: merged.base_dn,
        bind_dn: merged.bind_dn.filter(|dn| !dn.is_empty()),
        default_domain: merged.default_domain,
        domain: merged.domain,
        search_filter: merged
            .search_filter
            .unwrap_or_else(|| DEFAULT_SEARCH_FILTER.to_owned()),
        search_base: merged.search_base,
        attribute_map: merged.attribute_map,
        tls_certificate: merged.tls_certificate.map(String::into_bytes),
        search_constraints: merged.search_constraints.unwrap_or_default(),
        timeout: merged.timeout_seconds.map(Duration::from_secs),
        endpoint,
    })
}

fn build_endpoint(server_url: &str, port: &str) -> Result<Url> {
    let mut url = Url::parse(server_url).map_err(|err| {
        AuthError::Config(format!("invalid `server_url` {server_url}: {err}"))
    })?;

    match url.scheme() {
        "ldap" | "ldaps" => {},
        "ldapi" => return Ok(url),
        scheme => {
            return Err(AuthError::Config(format!(
                "unsupported scheme `{scheme}`, use ldap:// or ldaps://"
            )));
        },
    }

    if url.port().is_none() {
        let port: u16 = port
            .parse()
            .map_err(|_| AuthError::Config(format!("invalid `port` {port}")))?;
        url.set_port(Some(port)).map_err(|_| {
            AuthError::Config(format!("`server_url` {server_url} has no host"))
        })?;
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DirectorySettings {
        DirectorySettings {
            server_url: Some("ldap://localhost".into()),
            base_dn: Some("dc=example,dc=com".into()),
            search_filter: Some("(objectclass=person)".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_server_url() {
        let err = resolve(DirectorySettings::default(), &DirectorySettings::default());
        assert!(matches!(err, Err(AuthError::Config(_))));

        let overrides = DirectorySettings {
            server_url: Some("  ".into()),
            ..Default::default()
        };
        let err = resolve(overrides, &DirectorySettings::default());
        assert!(matches!(err, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_overrides_win() {
        let overrides = DirectorySettings {
            server_url: Some("ldaps://dc.example.com".into()),
            port: Some("636".into()),
            bind_dn: Some("cn=svc,dc=example,dc=com".into()),
            ..Default::default()
        };

        let config = resolve(overrides, &defaults()).unwrap();

        assert_eq!(config.server_url, "ldaps://dc.example.com");
        assert_eq!(config.endpoint().as_str(), "ldaps://dc.example.com:636");
        assert!(config.is_secure());
        assert_eq!(config.bind_dn.as_deref(), Some("cn=svc,dc=example,dc=com"));
        // kept from defaults.
        assert_eq!(config.base_dn.as_deref(), Some("dc=example,dc=com"));
        assert_eq!(config.search_filter, "(objectclass=person)");
    }

    #[test]
    fn test_builtin_fallbacks() {
        let overrides = DirectorySettings {
            server_url: Some("ldap://h".into()),
            ..Default::default()
        };

        let config = resolve(overrides, &DirectorySettings::default()).unwrap();

        assert_eq!(config.port, "389");
        assert_eq!(config.endpoint().as_str(), "ldap://h:389");
        assert_eq!(config.search_filter, DEFAULT_SEARCH_FILTER);
        assert!(!config.is_secure());
        assert!(config.bind_dn.is_none());
        assert!(config.search_constraints.is_empty());
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_explicit_url_port_is_kept() {
        let overrides = DirectorySettings {
            server_url: Some("ldap://h:10389".into()),
            port: Some("389".into()),
            ..Default::default()
        };

        let config = resolve(overrides, &DirectorySettings::default()).unwrap();
        assert_eq!(config.endpoint().port(), Some(10389));
    }

    #[test]
    fn test_invalid_endpoint() {
        for (url, port) in [
            ("http://h", "389"),
            ("ldap://h", "not-a-port"),
            ("not a url", "389"),
        ] {
            let overrides = DirectorySettings {
                server_url: Some(url.into()),
                port: Some(port.into()),
                ..Default::default()
            };
            assert!(
                matches!(
                    resolve(overrides, &DirectorySettings::default()),
                    Err(AuthError::Config(_))
                ),
                "{url}:{port} should be rejected"
            );
        }
    }

    #[test]
    fn test_active_directory_settings() {
        let settings = DirectorySettings::active_directory("jdoe", "corp.example.com");

        assert_eq!(settings.bind_dn.as_deref(), Some("jdoe@corp.example.com"));
        assert_eq!(settings.search_filter.as_deref(), Some("(sAMAccountName=jdoe)"));
        assert!(settings.server_url.is_none());
    }

    #[test]
    fn test_yaml_settings() {
        let yaml = r#"
directory:
  server_url: ldaps://ldap.example.com
  port: "636"
  base_dn: dc=example,dc=com
  default_domain: example.com
  search_filter: (objectClass=inetOrgPerson)
  attribute_map:
    - source: mail
      result_key: email
    - result_key: cn
  search_constraints:
    ou: staff
  timeout_seconds: 5
"#;

        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        let directory = &config.directory;

        assert_eq!(directory.server_url.as_deref(), Some("ldaps://ldap.example.com"));
        assert_eq!(directory.port.as_deref(), Some("636"));
        assert_eq!(directory.default_domain.as_deref(), Some("example.com"));
        assert_eq!(
            directory.attribute_map,
            Some(vec![
                AttributeMapping::new("mail", "email"),
                AttributeMapping {
                    source: None,
                    result_key: "cn".into()
                },
            ])
        );
        assert_eq!(
            directory
                .search_constraints
                .as_ref()
                .and_then(|c| c.get("ou"))
                .map(String::as_str),
            Some("staff")
        );

        let resolved = resolve(DirectorySettings::default(), directory).unwrap();
        assert_eq!(resolved.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/dirauth.yaml"))
            .read()
            .unwrap();

        assert_eq!(config.directory, DirectorySettings::default());
    }
}
