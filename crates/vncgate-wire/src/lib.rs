//! Tunnel plumbing for vncgate.
//!
//! Relays raw bytes between a browser-side framed transport (one message per
//! chunk) and a target byte stream.
//!
//! ## Architecture
//!
//! - **dial**: connects to a [`TargetDescriptor`](vncgate_types::target::TargetDescriptor)
//!   over TCP or a local socket
//! - **TunnelSession**: a dialed target waiting for its client transport
//! - **relay**: the two pumps; the first one to stop tears down both sides

pub mod dial;
pub mod tunnel;

pub use dial::{dial, TargetStream, WireError};
pub use tunnel::{relay, PumpExit, RelayOutcome, TunnelSession, DEFAULT_CHUNK_SIZE};
