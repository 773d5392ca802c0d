//! Shared error types for the vncgate system.

use thiserror::Error;

/// Top-level error type for the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No target is registered under the requested fingerprint.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Dialing the target failed.
    #[error("Target unreachable: {address} ({reason})")]
    TargetUnreachable {
        /// Address that was dialed.
        address: String,
        /// Why the dial failed.
        reason: String,
    },

    /// A target URL or transport could not be parsed.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The discovery glob pattern is malformed.
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidGlob {
        /// The offending pattern.
        pattern: String,
        /// Parser message.
        reason: String,
    },

    /// The filesystem notification backend could not be started.
    #[error("Discovery backend unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication failed or the credential store is unusable.
    #[error("Auth denied: {0}")]
    Auth(String),

    /// Certificate or key material could not be produced or loaded.
    #[error("TLS error: {0}")]
    Tls(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with GatewayError.
pub type GatewayResult<T> = Result<T, GatewayError>;
