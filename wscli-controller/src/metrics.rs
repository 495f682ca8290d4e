//! Metrics definitions for the session controller.
//!
//! This module defines all metrics keys used by the service and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

/// Metrics key for counting successfully provisioned sessions.
pub const METRICS_ID_CONTROLLER_SESSIONS_CREATED: &str = "wscli.controller.sessions.created";
/// Metrics key for counting admission rejections.
pub const METRICS_ID_CONTROLLER_ADMISSION_REJECTED: &str = "wscli.controller.admission.rejected";
/// Metrics key for counting rate-limited requests.
pub const METRICS_ID_CONTROLLER_RATE_LIMITED: &str = "wscli.controller.rate_limited";
/// Metrics key for the duration of pod-IP discovery.
pub const METRICS_ID_CONTROLLER_DISCOVERY_DURATION: &str = "wscli.controller.discovery.duration";
/// Metrics key for counting pod-IP discovery timeouts.
pub const METRICS_ID_CONTROLLER_DISCOVERY_TIMEOUT: &str = "wscli.controller.discovery.timeout";
/// Metrics key for counting rows removed by the expiry sweep.
pub const METRICS_ID_CONTROLLER_ROWS_PURGED: &str = "wscli.controller.rows.purged";

/// Describe all metrics used by the service.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_ID_CONTROLLER_SESSIONS_CREATED,
        metrics::Unit::Count,
        "Number of successfully provisioned sessions"
    );

    metrics::describe_counter!(
        METRICS_ID_CONTROLLER_ADMISSION_REJECTED,
        metrics::Unit::Count,
        "Number of workload requests rejected during admission"
    );

    metrics::describe_counter!(
        METRICS_ID_CONTROLLER_RATE_LIMITED,
        metrics::Unit::Count,
        "Number of requests rejected by the per-caller rate limit"
    );

    metrics::describe_histogram!(
        METRICS_ID_CONTROLLER_DISCOVERY_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of pod-IP discovery for successful sessions"
    );

    metrics::describe_counter!(
        METRICS_ID_CONTROLLER_DISCOVERY_TIMEOUT,
        metrics::Unit::Count,
        "Number of sessions whose pod never exposed an IP in time"
    );

    metrics::describe_counter!(
        METRICS_ID_CONTROLLER_ROWS_PURGED,
        metrics::Unit::Count,
        "Number of expired rows removed by the sweep task"
    );
}
