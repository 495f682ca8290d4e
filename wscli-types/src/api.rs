//! # API module
//!
//! Entry point for all API version modules.
//!
//! Currently exposes the version 1 session API types under [`v1`].

pub mod v1;

/// Audience claim value for sandbox attach tokens.
pub const ATTACH_AUDIENCE: &str = "attach";

/// Port on which every sandbox pod serves its terminal WebSocket.
pub const TERMINAL_PORT: u16 = 7681;
