use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dirauth::config::Configuration;
use dirauth::{Authenticator, Credentials, DirectorySettings, LdapClient, telemetry};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    /// Bind as the configured DN, or discover it by search.
    Ldap,
    /// Bind as `username@domain`.
    Ad,
}

/// Check credentials against an LDAP or Active Directory server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path of the configuration file.
    #[arg(short, long, env = "DIRAUTH_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
    #[arg(short, long)]
    username: String,
    #[arg(short, long, env = "DIRAUTH_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, value_enum, default_value_t = Profile::Ldap)]
    profile: Profile,
    /// Extra `key=value` equality clause for the discovery search.
    #[arg(long = "constraint", value_parser = parse_constraint)]
    constraints: Vec<(String, String)>,
}

fn parse_constraint(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("`{raw}` is not a key=value pair"))
}

/// Discovery with no constraint at all would bind as whichever entry the base
/// filter returns first.
fn unconstrained_discovery(
    defaults: &DirectorySettings,
    constraints: &[(String, String)],
) -> bool {
    let direct = defaults.bind_dn.as_deref().is_some_and(|dn| !dn.is_empty());
    let configured = defaults
        .search_constraints
        .as_ref()
        .is_some_and(|constraints| !constraints.is_empty());

    !direct && !configured && constraints.is_empty()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = telemetry::setup_tracing() {
        eprintln!("cannot initialize logging: {err}");
    }
    telemetry::describe_metrics();

    let config = match Configuration::default().path(args.config).read() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "cannot read configuration");
            return ExitCode::FAILURE;
        },
    };

    let client = LdapClient::new().with_conn_timeout(CONNECT_TIMEOUT);
    let authenticator =
        Authenticator::new(client, Arc::new(config.directory.clone()));

    let result = match args.profile {
        Profile::Ad => {
            authenticator
                .login_with_domain_profile(&args.username, &args.password)
                .await
        },
        Profile::Ldap => {
            if unconstrained_discovery(&config.directory, &args.constraints) {
                tracing::error!(
                    "discovery needs at least one `--constraint` or configured `search_constraints`"
                );
                return ExitCode::FAILURE;
            }

            let overrides = DirectorySettings {
                search_constraints: (!args.constraints.is_empty())
                    .then(|| args.constraints.into_iter().collect::<BTreeMap<_, _>>()),
                ..Default::default()
            };
            authenticator
                .authenticate(&Credentials::new(args.username, args.password), overrides)
                .await
        },
    };

    match result {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                println!("{json}");
                if result.found {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot serialize result");
                ExitCode::FAILURE
            },
        },
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_constraint() {
        assert_eq!(
            parse_constraint("uid=alice"),
            Ok(("uid".to_owned(), "alice".to_owned()))
        );
        assert_eq!(
            parse_constraint("cn=a=b"),
            Ok(("cn".to_owned(), "a=b".to_owned()))
        );
        assert!(parse_constraint("uid").is_err());
        assert!(parse_constraint("=alice").is_err());
    }

    #[test]
    fn test_unconstrained_discovery() {
        let discovery = DirectorySettings {
            server_url: Some("ldap://h".into()),
            base_dn: Some("dc=y".into()),
            ..Default::default()
        };
        let uid = [("uid".to_owned(), "alice".to_owned())];

        assert!(unconstrained_discovery(&discovery, &[]));
        assert!(!unconstrained_discovery(&discovery, &uid));

        let configured = DirectorySettings {
            search_constraints: Some(BTreeMap::from([(
                "uid".to_owned(),
                "alice".to_owned(),
            )])),
            ..discovery.clone()
        };
        assert!(!unconstrained_discovery(&configured, &[]));

        let direct = DirectorySettings {
            bind_dn: Some("cn=svc,dc=y".into()),
            ..discovery
        };
        assert!(!unconstrained_discovery(&direct, &[]));
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from([
            "dirauth",
            "-u",
            "alice",
            "-p",
            "secret",
            "--constraint",
            "ou=staff",
        ])
        .unwrap();

        assert_eq!(args.username, "alice");
        assert_eq!(args.constraints, vec![("ou".to_owned(), "staff".to_owned())]);
        assert!(matches!(args.profile, Profile::Ldap));
    }
}
