#![deny(missing_docs)]
//! Runtime glue shared by the WS-CLI services.
//!
//! Both service binaries (controller and gateway) use the same handful of
//! process-level helpers: tracing installation, a shutdown-signal task that
//! distinguishes graceful from unexpected shutdowns, and the
//! [`StartedServices`] readiness tracker consumed by `/readyz`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Renders the crate name and version of the calling crate.
#[macro_export]
macro_rules! version_info {
    () => {
        format!(
            "{} v{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )
    };
}

/// Installs the global tracing subscriber.
///
/// The filter is taken from `RUST_LOG` if present, otherwise from the
/// provided default directive string.
pub fn install_tracing(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves when the process receives SIGINT or SIGTERM.
pub async fn default_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot install ctrl-c handler: {err:?}");
        }
    };
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    tracing::error!("cannot install SIGTERM handler: {err:?}");
                    ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Spawns the shutdown watcher task.
///
/// Returns the [`CancellationToken`] every service task should observe and
/// a flag that is `true` iff the token was cancelled because the shutdown
/// signal fired (as opposed to an internal error cancelling the token).
pub fn spawn_shutdown_task(
    signal: impl Future<Output = ()> + Send + 'static,
) -> (CancellationToken, Arc<AtomicBool>) {
    let cancellation_token = CancellationToken::new();
    let is_graceful = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        let is_graceful = Arc::clone(&is_graceful);
        async move {
            tokio::select! {
                _ = signal => {
                    tracing::info!("received shutdown signal");
                    is_graceful.store(true, Ordering::Relaxed);
                    cancellation_token.cancel();
                }
                _ = cancellation_token.cancelled() => {
                    // cancelled internally, nothing to do
                }
            }
        }
    });
    (cancellation_token, is_graceful)
}

/// Tracks which long-running services finished their startup.
///
/// Every background service obtains a [`StartedService`] handle via
/// [`StartedServices::new_service`] and flips it once initialized; the
/// readiness endpoint reports ready only when all handles flipped.
#[derive(Debug, Default, Clone)]
pub struct StartedServices {
    registered: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
}

/// Handle for a single service to report its startup.
#[derive(Debug)]
pub struct StartedService {
    started: Arc<AtomicUsize>,
    reported: bool,
}

impl StartedServices {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new service and returns its reporting handle.
    pub fn new_service(&self) -> StartedService {
        self.registered.fetch_add(1, Ordering::SeqCst);
        StartedService {
            started: Arc::clone(&self.started),
            reported: false,
        }
    }

    /// Returns `true` iff every registered service reported startup.
    pub fn all_started(&self) -> bool {
        self.started.load(Ordering::SeqCst) == self.registered.load(Ordering::SeqCst)
    }
}

impl StartedService {
    /// Marks the owning service as started. Idempotent.
    pub fn set_started(&mut self) {
        if !self.reported {
            self.reported = true;
            self.started.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_services_tracks_all_handles() {
        let services = StartedServices::new();
        assert!(services.all_started());

        let mut a = services.new_service();
        let mut b = services.new_service();
        assert!(!services.all_started());

        a.set_started();
        assert!(!services.all_started());
        // double report must not count twice
        a.set_started();
        assert!(!services.all_started());

        b.set_started();
        assert!(services.all_started());
    }

    #[tokio::test]
    async fn shutdown_task_flags_graceful_shutdown() {
        let (trigger_tx, trigger_rx) = tokio::sync::oneshot::channel::<()>();
        let (token, is_graceful) = spawn_shutdown_task(async move {
            let _ = trigger_rx.await;
        });
        assert!(!is_graceful.load(Ordering::Relaxed));
        trigger_tx.send(()).expect("receiver alive");
        token.cancelled().await;
        assert!(is_graceful.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn internal_cancel_is_not_graceful() {
        let (token, is_graceful) = spawn_shutdown_task(std::future::pending());
        token.cancel();
        token.cancelled().await;
        assert!(!is_graceful.load(Ordering::Relaxed));
    }
}
