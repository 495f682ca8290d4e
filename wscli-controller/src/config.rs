//! Configuration types and CLI/environment parsing for the session
//! controller.
//!
//! Additionally this module defines the [`Environment`] to assert dev-only
//! code paths (ephemeral signing keys, permissive CORS).

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use secrecy::SecretString;

/// Ceiling for the per-session lifetime; a config above this is a fatal
/// startup misconfiguration.
pub const MAX_SESSION_EXPIRY: Duration = Duration::from_secs(900);

/// Floor for the pod-discovery deadline.
pub const MIN_POD_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// The environment the service is running in.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Environment {
    /// Production environment.
    Prod,
    /// Development environment.
    Dev,
}

impl Environment {
    /// Asserts that `Environment` is `dev`. Panics if not the case.
    pub fn assert_is_dev(&self) {
        assert!(matches!(self, Environment::Dev), "Is not dev environment")
    }

    /// Returns `true` for the development environment.
    pub fn is_dev(&self) -> bool {
        matches!(self, Environment::Dev)
    }
}

/// How callers authenticate against the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CallerAuthMode {
    /// Static API keys configured on the controller.
    ApiKey,
    /// Bearer identity tokens minted by an external provider, verified
    /// against that provider's key set.
    IdentityToken,
}

/// The configuration for the session controller.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`.
#[derive(Parser, Debug)]
pub struct ControllerConfig {
    /// The environment of the controller (either `prod` or `dev`).
    #[clap(long, env = "WSCLI_CONTROLLER_ENVIRONMENT", default_value = "prod")]
    pub environment: Environment,

    /// The bind addr of the AXUM server.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_BIND_ADDR",
        default_value = "0.0.0.0:8080"
    )]
    pub bind_addr: SocketAddr,

    /// Orchestrator namespace sandbox jobs are submitted to.
    #[clap(long, env = "WSCLI_CONTROLLER_NAMESPACE", default_value = "ws-cli")]
    pub namespace: String,

    /// Container image used by submitted sandbox jobs.
    #[clap(long, env = "WSCLI_CONTROLLER_RUNNER_IMAGE")]
    pub runner_image: String,

    /// How long a finished job lingers before the orchestrator reclaims it.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_JOB_TTL",
        default_value = "5min",
        value_parser = humantime::parse_duration
    )]
    pub job_ttl: Duration,

    /// Hard runtime ceiling for a sandbox job.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_JOB_ACTIVE_DEADLINE",
        default_value = "1h",
        value_parser = humantime::parse_duration
    )]
    pub job_active_deadline: Duration,

    /// Lifetime of a session and its attach token. At most 15 minutes.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_SESSION_EXPIRY",
        default_value = "10min",
        value_parser = humantime::parse_duration
    )]
    pub session_expiry: Duration,

    /// Deadline for observing the sandbox pod's IP after job submission.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_POD_DISCOVERY_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub pod_discovery_timeout: Duration,

    /// Comma-separated list of allowed cross-origin origins.
    #[clap(long, env = "WSCLI_CONTROLLER_ALLOWED_ORIGINS", default_value = "")]
    pub allowed_origins: String,

    /// Comma-separated list of hostnames workload archives may be fetched
    /// from. A leading `*.` matches any subdomain.
    #[clap(long, env = "WSCLI_CONTROLLER_ALLOWED_CODE_DOMAINS")]
    pub allowed_code_domains: String,

    /// Window of the per-caller session rate limit.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_RATE_LIMIT_WINDOW",
        default_value = "1min",
        value_parser = humantime::parse_duration
    )]
    pub rate_limit_window: Duration,

    /// Max session creations per caller and window.
    #[clap(long, env = "WSCLI_CONTROLLER_RATE_LIMIT_MAX", default_value = "10")]
    pub rate_limit_max: u32,

    /// Comma-separated paths exempt from the rate limit.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_RATE_LIMIT_SKIP_PATHS",
        default_value = ""
    )]
    pub rate_limit_skip_paths: String,

    /// The connection string for the Postgres DB.
    #[clap(long, env = "WSCLI_CONTROLLER_DB_CONNECTION_STRING")]
    pub db_connection_string: SecretString,

    /// The max connections for the Postgres pool.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_DB_MAX_CONNECTIONS",
        default_value = "20"
    )]
    pub db_max_connections: NonZeroU32,

    /// Idle timeout for pooled DB connections.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_DB_IDLE_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub db_idle_timeout: Duration,

    /// Caller admission strategy (`api-key` or `identity-token`).
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_CALLER_AUTH_MODE",
        default_value = "api-key"
    )]
    pub caller_auth_mode: CallerAuthMode,

    /// API keys as comma-separated `name:secret` pairs (api-key mode).
    #[clap(long, env = "WSCLI_CONTROLLER_API_KEYS", default_value = "")]
    pub api_keys: SecretString,

    /// Key set URL of the external identity provider (identity-token mode).
    #[clap(long, env = "WSCLI_CONTROLLER_IDENTITY_JWKS_URL")]
    pub identity_jwks_url: Option<String>,

    /// Expected issuer of external identity tokens.
    #[clap(long, env = "WSCLI_CONTROLLER_IDENTITY_ISSUER")]
    pub identity_issuer: Option<String>,

    /// Expected audience of external identity tokens.
    #[clap(long, env = "WSCLI_CONTROLLER_IDENTITY_AUDIENCE")]
    pub identity_audience: Option<String>,

    /// Location of the PKCS#8 PEM signing key. Generated ephemerally in
    /// `dev` when absent.
    #[clap(long, env = "WSCLI_CONTROLLER_KEY_MATERIAL")]
    pub key_material: Option<PathBuf>,

    /// Interval of the expired-row sweep task.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_SWEEP_INTERVAL",
        default_value = "1min",
        value_parser = humantime::parse_duration
    )]
    pub sweep_interval: Duration,

    /// Max wait time the service waits for its workers during shutdown.
    #[clap(
        long,
        env = "WSCLI_CONTROLLER_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_wait_time_shutdown: Duration,
}

impl ControllerConfig {
    /// Validates cross-field constraints that clap cannot express.
    ///
    /// Violations are fatal startup misconfigurations.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.session_expiry > MAX_SESSION_EXPIRY {
            eyre::bail!(
                "session expiry {:?} exceeds the ceiling of {MAX_SESSION_EXPIRY:?}",
                self.session_expiry
            );
        }
        if self.pod_discovery_timeout < MIN_POD_DISCOVERY_TIMEOUT {
            eyre::bail!(
                "pod discovery timeout {:?} is below the floor of {MIN_POD_DISCOVERY_TIMEOUT:?}",
                self.pod_discovery_timeout
            );
        }
        if self.allowed_code_domains.split(',').all(|d| d.trim().is_empty()) {
            eyre::bail!("allowed code domains must not be empty");
        }
        match self.caller_auth_mode {
            CallerAuthMode::ApiKey => {}
            CallerAuthMode::IdentityToken => {
                if self.identity_jwks_url.is_none() {
                    eyre::bail!("identity-token auth mode requires an identity JWKS url");
                }
            }
        }
        Ok(())
    }

    /// The configured code-domain allowlist as trimmed entries.
    pub fn allowed_code_domains(&self) -> Vec<String> {
        split_csv(&self.allowed_code_domains)
    }

    /// The configured cross-origin allowlist as trimmed entries.
    pub fn allowed_origins(&self) -> Vec<String> {
        split_csv(&self.allowed_origins)
    }

    /// The configured rate-limit skip paths as trimmed entries.
    pub fn rate_limit_skip_paths(&self) -> Vec<String> {
        split_csv(&self.rate_limit_skip_paths)
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        assert_eq!(
            split_csv(" github.com, *.example.org ,,"),
            vec!["github.com".to_owned(), "*.example.org".to_owned()]
        );
        assert!(split_csv("").is_empty());
    }
}
