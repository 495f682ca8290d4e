//! Metrics definitions for the WebSocket gateway.
//!
//! This module defines all metrics keys used by the service and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

/// Metrics key for counting successful attaches.
pub const METRICS_ID_GATEWAY_ATTACH_SUCCESS: &str = "wscli.gateway.attach.success";
/// Metrics key for counting destroyed attach attempts.
pub const METRICS_ID_GATEWAY_ATTACH_REJECTED: &str = "wscli.gateway.attach.rejected";
/// Metrics key for currently running proxy streams.
pub const METRICS_ID_GATEWAY_PROXY_ACTIVE: &str = "wscli.gateway.proxy.active";
/// Metrics key for the lifetime of finished proxy streams.
pub const METRICS_ID_GATEWAY_PROXY_DURATION: &str = "wscli.gateway.proxy.duration";

/// Describe all metrics used by the service.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_ID_GATEWAY_ATTACH_SUCCESS,
        metrics::Unit::Count,
        "Number of attaches that reached the proxy stage"
    );

    metrics::describe_counter!(
        METRICS_ID_GATEWAY_ATTACH_REJECTED,
        metrics::Unit::Count,
        "Number of attach attempts destroyed before the upgrade"
    );

    metrics::describe_gauge!(
        METRICS_ID_GATEWAY_PROXY_ACTIVE,
        metrics::Unit::Count,
        "Number of currently open proxy streams"
    );

    metrics::describe_histogram!(
        METRICS_ID_GATEWAY_PROXY_DURATION,
        metrics::Unit::Milliseconds,
        "Lifetime of finished proxy streams"
    );
}
