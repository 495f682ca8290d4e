//! API module for the session controller.
//!
//! This module defines all HTTP endpoints the controller serves and
//! organizes them into submodules:
//!
//! - [`errors`] – API error categories and their response mapping.
//! - [`health`] – health endpoints (`/healthz`, `/readyz`).
//! - [`jwks`] – the public key set (`/.well-known/jwks.json`).
//! - [`sessions`] – session creation and lookup (`/api/sessions`).

pub(crate) mod errors;
pub(crate) mod health;
pub(crate) mod jwks;
pub(crate) mod sessions;
