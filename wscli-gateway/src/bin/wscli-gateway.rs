//! WS-CLI Gateway Binary
//!
//! This is the main entry point for the WebSocket gateway service. It
//! initializes tracing and metrics, connects the shared Postgres store,
//! and starts the service with configuration from command-line arguments
//! or environment variables. Verification keys are fetched lazily from the
//! controller, so the gateway starts even while the controller is down.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::Parser;
use eyre::Context as _;
use wscli_gateway::config::GatewayConfig;
use wscli_store::postgres::PostgresSessionStore;

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("can install");
    wscli_common::install_tracing("wscli_gateway=debug,info");
    wscli_gateway::metrics::describe_metrics();

    tracing::info!("{}", wscli_common::version_info!());

    let config = GatewayConfig::parse();
    config.validate().context("invalid configuration")?;

    tracing::info!("starting gateway with config: {config:#?}");

    let store = PostgresSessionStore::init(
        &config.db_connection_string,
        config.db_max_connections,
        config.db_idle_timeout,
    )
    .await
    .context("while connecting to the session store")?;

    let (cancellation_token, is_graceful_shutdown) =
        wscli_common::spawn_shutdown_task(wscli_common::default_shutdown_signal());

    let router = wscli_gateway::init(&config, Arc::new(store));

    tracing::info!("binding to {}", config.bind_addr);
    let tcp_listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("while binding tcp-listener")?;

    let axum_cancel_token = cancellation_token.clone();
    let server = tokio::spawn(async move {
        tracing::info!(
            "starting axum server on {}",
            tcp_listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or(String::from("invalid addr"))
        );
        let axum_shutdown_signal = axum_cancel_token.clone();
        let axum_result = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move { axum_shutdown_signal.cancelled().await })
            .await;
        tracing::info!("axum server shutdown");
        if let Err(err) = axum_result {
            tracing::error!("got error from axum: {err:?}");
        }
        // cancel in case axum encountered an error, to shut the service down
        axum_cancel_token.cancel();
    });

    tracing::info!("everything started successfully - now waiting for shutdown...");
    cancellation_token.cancelled().await;

    let max_wait = config.max_wait_time_shutdown;
    tracing::info!("waiting for shutdown of services (max wait time {max_wait:?})..");
    match tokio::time::timeout(max_wait, server).await {
        Ok(_) => tracing::info!("successfully finished shutdown in time"),
        Err(_) => tracing::warn!("could not finish shutdown in time"),
    }

    if is_graceful_shutdown.load(Ordering::Relaxed) {
        tracing::info!("good night!");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("unexpected shutdown - check error logs");
        Ok(ExitCode::FAILURE)
    }
}
