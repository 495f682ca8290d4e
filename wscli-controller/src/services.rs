//! Core services that make up the session controller.
//!
//! Each service encapsulates one responsibility and is consumed by the API
//! layer:
//!
//! - [`admission`] – validates workload requests before anything touches
//!   the store or the orchestrator.
//! - [`caller_auth`] – authenticates callers (API key or external identity
//!   token).
//! - [`orchestrator`] – submits sandbox jobs and discovers pod IPs.
//! - [`rate_limit`] – per-caller session-creation rate limiting.

pub mod admission;
pub mod caller_auth;
pub mod orchestrator;
pub mod rate_limit;
