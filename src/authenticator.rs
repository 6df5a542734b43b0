//! Credential check against a directory.
//!
//! Two strategies exist. When a bind DN is configured the caller's password is
//! checked by binding as that DN, and the search only enriches the result.
//! Otherwise the DN is discovered by search first and then bound.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{
    DirectoryClient, DirectoryConnection, Entry, SearchRequest, SearchScope,
    TlsOptions, first_entry,
};
use crate::config::{DirectoryConfig, DirectorySettings, resolve};
use crate::error::{AuthError, Result};
use crate::identity::{Credentials, NormalizedIdentity};
use crate::projection::{
    AttributeValue, compose_filter, project, requested_attributes,
};
use crate::telemetry;

/// Upper bound on releasing a connection, past the call deadline.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Successful outcome of an authentication call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthResult {
    /// DN the password was verified against. `None` when discovery found no
    /// entry.
    pub bound_as: Option<String>,
    /// Mapped attributes, keyed by result key.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Whether an entry matched. Always `true` for direct binds.
    pub found: bool,
    pub identity: NormalizedIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Direct,
    Discovery,
}

impl Strategy {
    fn of(config: &DirectoryConfig) -> Self {
        if config.bind_dn.is_some() {
            Strategy::Direct
        } else {
            Strategy::Discovery
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Discovery => "discovery",
        }
    }
}

/// Checks credentials against a directory.
///
/// Holds the process-wide defaults; every call merges its own overrides on
/// top of them and opens its own connection.
#[derive(Debug, Clone)]
pub struct Authenticator<C> {
    client: C,
    defaults: Arc<DirectorySettings>,
}

impl<C: DirectoryClient> Authenticator<C> {
    /// Create a new [`Authenticator`].
    pub fn new(client: C, defaults: Arc<DirectorySettings>) -> Self {
        Self { client, defaults }
    }

    /// Check `credentials`, with `overrides` applied over the defaults.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        overrides: DirectorySettings,
    ) -> Result<AuthResult> {
        self.authenticate_with_cancel(credentials, overrides, CancellationToken::new())
            .await
    }

    /// Same as [`Authenticator::authenticate`], aborted once `cancel` fires.
    pub async fn authenticate_with_cancel(
        &self,
        credentials: &Credentials,
        overrides: DirectorySettings,
        cancel: CancellationToken,
    ) -> Result<AuthResult> {
        let config = resolve(overrides, &self.defaults)?;
        credentials.check()?;

        let strategy = Strategy::of(&config);
        if strategy == Strategy::Discovery && discovery_base(&config).is_none() {
            return Err(AuthError::Config(
                "discovery needs `search_base` or `base_dn`".into(),
            ));
        }

        let start = Instant::now();
        let result = self.run(&config, credentials, strategy, &cancel).await;

        let outcome = match &result {
            Ok(result) if result.found => {
                tracing::info!(
                    strategy = strategy.as_str(),
                    bound_as = result.bound_as.as_deref().unwrap_or_default(),
                    "directory authentication succeeded"
                );
                "success"
            },
            Ok(_) => {
                tracing::info!(
                    strategy = strategy.as_str(),
                    username = %credentials.username,
                    "no directory entry matched"
                );
                "not_found"
            },
            Err(err) => {
                tracing::info!(
                    strategy = strategy.as_str(),
                    error = %err,
                    "directory authentication failed"
                );
                err.kind()
            },
        };
        telemetry::record(strategy.as_str(), outcome, start.elapsed());

        result
    }

    /// Blocking version of [`Authenticator::authenticate`].
    ///
    /// Runs the call on a short-lived runtime. Called from inside a tokio
    /// runtime it fails with [`AuthError::Runtime`].
    pub fn authenticate_blocking(
        &self,
        credentials: &Credentials,
        overrides: DirectorySettings,
    ) -> Result<AuthResult> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(AuthError::Runtime(std::io::Error::other(
                "blocking call made from inside an async runtime",
            )));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(self.authenticate(credentials, overrides))
    }

    /// Active Directory login: bind as `username@domain` and look the user
    /// up by `sAMAccountName`.
    ///
    /// The domain comes from the defaults' `domain`, or `default_domain`.
    pub async fn login_with_domain_profile(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthResult> {
        let domain = self
            .defaults
            .domain
            .as_deref()
            .or(self.defaults.default_domain.as_deref())
            .ok_or_else(|| {
                AuthError::Config(
                    "missing `domain` for the Active Directory profile".into(),
                )
            })?;

        let overrides = DirectorySettings::active_directory(username, domain);
        self.authenticate(&Credentials::new(username, password), overrides)
            .await
    }

    async fn run(
        &self,
        config: &DirectoryConfig,
        credentials: &Credentials,
        strategy: Strategy,
        cancel: &CancellationToken,
    ) -> Result<AuthResult> {
        let deadline = config.timeout.map(|timeout| Instant::now() + timeout);
        let tls = TlsOptions {
            ca_certificate: config
                .is_secure()
                .then(|| config.tls_certificate.clone())
                .flatten(),
        };

        tracing::debug!(endpoint = %config.endpoint(), "connecting to directory");
        let mut conn = guarded(
            async {
                self.client
                    .connect(config.endpoint(), &tls)
                    .await
                    .map_err(|err| AuthError::Connection(err.message))
            },
            deadline,
            cancel,
        )
        .await?;

        let result = match strategy {
            Strategy::Direct => {
                guarded(bind_direct(&mut conn, config, credentials), deadline, cancel)
                    .await
            },
            Strategy::Discovery => {
                guarded(
                    bind_via_discovery(
                        &mut conn,
                        config,
                        credentials,
                        &config.search_constraints,
                    ),
                    deadline,
                    cancel,
                )
                .await
            },
        };

        match tokio::time::timeout(CLOSE_GRACE, conn.close()).await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "cannot close directory connection");
            },
            Err(_) => {
                tracing::warn!(
                    grace = ?CLOSE_GRACE,
                    "directory connection close abandoned"
                );
            },
        }

        result
    }
}

/// Bind as the configured DN, then optionally read the mapped attributes.
pub async fn bind_direct<Conn: DirectoryConnection>(
    conn: &mut Conn,
    config: &DirectoryConfig,
    credentials: &Credentials,
) -> Result<AuthResult> {
    let identity =
        NormalizedIdentity::derive(&credentials.username, config.default_domain.as_deref());
    let bind_dn = config
        .bind_dn
        .as_deref()
        .ok_or_else(|| AuthError::Config("direct bind needs `bind_dn`".into()))?;

    tracing::debug!(dn = %bind_dn, "binding to directory");
    conn.bind(bind_dn, &credentials.password)
        .await
        .map_err(AuthError::bind)?;

    let Some(map) = config.attribute_map.as_deref() else {
        return Ok(AuthResult {
            bound_as: Some(bind_dn.to_owned()),
            attributes: BTreeMap::new(),
            found: true,
            identity,
        });
    };

    let base = config.search_base.as_deref().unwrap_or(bind_dn);
    let request = SearchRequest {
        scope: SearchScope::Subtree,
        size_limit: 1,
        attributes: requested_attributes(map),
        filter: config.search_filter.clone(),
    };

    let attributes = search_first(conn, base, &request)
        .await?
        .map(|entry| project(&entry, map))
        .unwrap_or_default();

    Ok(AuthResult {
        bound_as: Some(bind_dn.to_owned()),
        attributes,
        found: true,
        identity,
    })
}

/// Find the bind DN by search, then bind as it.
///
/// No matching entry is not an error: the result has `found: false`.
pub async fn bind_via_discovery<Conn: DirectoryConnection>(
    conn: &mut Conn,
    config: &DirectoryConfig,
    credentials: &Credentials,
    constraints: &BTreeMap<String, String>,
) -> Result<AuthResult> {
    let identity =
        NormalizedIdentity::derive(&credentials.username, config.default_domain.as_deref());
    let base = discovery_base(config).ok_or_else(|| {
        AuthError::Config("discovery needs `search_base` or `base_dn`".into())
    })?;

    if constraints.is_empty() {
        tracing::warn!(
            filter = %config.search_filter,
            "discovery without search constraints binds as the first matching entry"
        );
    }

    let mut attributes = vec!["dn".to_owned()];
    if let Some(map) = config.attribute_map.as_deref() {
        attributes.extend(requested_attributes(map));
    }
    let request = SearchRequest {
        scope: SearchScope::Subtree,
        size_limit: 1,
        attributes,
        filter: compose_filter(&config.search_filter, constraints),
    };

    tracing::debug!(base, filter = %request.filter, "searching bind DN");
    let Some(entry) = search_first(conn, base, &request).await? else {
        return Ok(AuthResult {
            bound_as: None,
            attributes: BTreeMap::new(),
            found: false,
            identity,
        });
    };

    let attributes = config
        .attribute_map
        .as_deref()
        .map(|map| project(&entry, map))
        .unwrap_or_default();

    tracing::debug!(dn = %entry.dn, "binding as discovered entry");
    conn.bind(&entry.dn, &credentials.password)
        .await
        .map_err(AuthError::bind)?;

    Ok(AuthResult {
        bound_as: Some(entry.dn),
        attributes,
        found: true,
        identity,
    })
}

fn discovery_base(config: &DirectoryConfig) -> Option<&str> {
    config
        .search_base
        .as_deref()
        .or(config.base_dn.as_deref())
        .filter(|base| !base.is_empty())
}

async fn search_first<Conn: DirectoryConnection>(
    conn: &mut Conn,
    base: &str,
    request: &SearchRequest,
) -> Result<Option<Entry>> {
    let mut stream = conn.search(base, request).await.map_err(AuthError::search)?;
    first_entry(stream.as_mut()).await.map_err(AuthError::search)
}

/// Run `future` until it completes, `deadline` passes or `cancel` fires.
async fn guarded<F, T>(
    future: F,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let expired = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        _ = expired => Err(AuthError::Timeout),
        result = future => result,
    }
}
