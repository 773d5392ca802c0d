//! Kernel-specific error types.

use thiserror::Error;
use vncgate_types::error::GatewayError;

/// Kernel error type wrapping GatewayError with kernel-specific context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped GatewayError.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The gateway failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
