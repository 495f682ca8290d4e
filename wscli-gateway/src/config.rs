//! Configuration types and CLI/environment parsing for the WebSocket
//! gateway.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use secrecy::SecretString;
use wscli_types::api::TERMINAL_PORT;

/// Bounds for the upstream WebSocket connect timeout.
pub const MIN_UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// See [`MIN_UPSTREAM_CONNECT_TIMEOUT`].
pub const MAX_UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The environment the service is running in.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Environment {
    /// Production environment.
    Prod,
    /// Development environment.
    Dev,
}

/// The configuration for the WebSocket gateway.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`.
#[derive(Parser, Debug)]
pub struct GatewayConfig {
    /// The environment of the gateway (either `prod` or `dev`).
    #[clap(long, env = "WSCLI_GATEWAY_ENVIRONMENT", default_value = "prod")]
    pub environment: Environment,

    /// The bind addr of the AXUM server.
    #[clap(long, env = "WSCLI_GATEWAY_BIND_ADDR", default_value = "0.0.0.0:8081")]
    pub bind_addr: SocketAddr,

    /// URL of the controller's public key set.
    #[clap(
        long,
        env = "WSCLI_GATEWAY_KEY_SET_URL",
        default_value = "http://wscli-controller:8080/.well-known/jwks.json"
    )]
    pub key_set_url: String,

    /// The connection string for the Postgres DB.
    #[clap(long, env = "WSCLI_GATEWAY_DB_CONNECTION_STRING")]
    pub db_connection_string: SecretString,

    /// The max connections for the Postgres pool.
    #[clap(long, env = "WSCLI_GATEWAY_DB_MAX_CONNECTIONS", default_value = "20")]
    pub db_max_connections: NonZeroU32,

    /// Idle timeout for pooled DB connections.
    #[clap(
        long,
        env = "WSCLI_GATEWAY_DB_IDLE_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub db_idle_timeout: Duration,

    /// Terminal port of sandbox pods. The wire contract pins 7681; this is
    /// overridable for test harnesses only.
    #[clap(long, env = "WSCLI_GATEWAY_TERMINAL_PORT", default_value_t = TERMINAL_PORT)]
    pub terminal_port: u16,

    /// Timeout for the upstream WebSocket connect (bounds 5s..30s).
    #[clap(
        long,
        env = "WSCLI_GATEWAY_UPSTREAM_CONNECT_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub upstream_connect_timeout: Duration,

    /// Max wait time the service waits for its workers during shutdown.
    #[clap(
        long,
        env = "WSCLI_GATEWAY_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_wait_time_shutdown: Duration,
}

impl GatewayConfig {
    /// Validates cross-field constraints that clap cannot express.
    ///
    /// Violations are fatal startup misconfigurations.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.upstream_connect_timeout < MIN_UPSTREAM_CONNECT_TIMEOUT
            || self.upstream_connect_timeout > MAX_UPSTREAM_CONNECT_TIMEOUT
        {
            eyre::bail!(
                "upstream connect timeout {:?} is outside {MIN_UPSTREAM_CONNECT_TIMEOUT:?}..={MAX_UPSTREAM_CONNECT_TIMEOUT:?}",
                self.upstream_connect_timeout
            );
        }
        Ok(())
    }
}
