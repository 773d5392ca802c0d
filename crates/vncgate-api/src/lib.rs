//! HTTP/WebSocket API for the vncgate gateway.
//!
//! Exposes the target list and its change stream, the WebSocket tunnel
//! endpoint, the bundled dashboard and login sessions. The server terminates
//! TLS itself unless it has been disabled.

pub mod assets;
pub mod events;
pub mod rate_limiter;
pub mod routes;
pub mod server;
pub mod session;
pub mod tls;
pub mod ws;
