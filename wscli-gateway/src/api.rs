//! API module for the WebSocket gateway.
//!
//! - [`attach`] – the `/ws/{sessionId}` terminal page and upgrade path.
//! - [`health`] – the `/healthz` endpoint.

pub(crate) mod attach;
pub(crate) mod health;
