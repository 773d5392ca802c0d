//! Core kernel for the vncgate gateway.
//!
//! - **TargetRegistry**: the single in-memory store of reachable targets,
//!   with a non-blocking, lossy event fan-out
//! - **DiscoveryEngine**: keeps the registry in sync with glob-matched local
//!   sockets using filesystem notifications plus a polling fallback
//! - **CredentialStore**: PBKDF2 password file for dashboard logins
//! - **TLS bootstrap**: self-signed certificate generation
//! - **Gateway**: owns all of the above

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod tls;

pub use gateway::Gateway;
pub use registry::{Subscription, SubscriptionId, TargetRegistry};
