//! Registry change events.
//!
//! Events are ephemeral: they are delivered at most once per subscriber and
//! never stored.

use crate::target::{Fingerprint, PublicTarget, TargetDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The target became available.
    Added,
    /// The target is gone.
    Removed,
}

impl ChangeKind {
    /// Event name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub fingerprint: Fingerprint,
    pub target: TargetDescriptor,
}

impl ChangeEvent {
    /// Build an `Added` event.
    pub fn added(target: TargetDescriptor) -> Self {
        Self::new(ChangeKind::Added, target)
    }

    /// Build a `Removed` event.
    pub fn removed(target: TargetDescriptor) -> Self {
        Self::new(ChangeKind::Removed, target)
    }

    fn new(kind: ChangeKind, target: TargetDescriptor) -> Self {
        Self {
            kind,
            fingerprint: target.fingerprint(),
            target,
        }
    }

    /// Password-free view of the affected target.
    pub fn public(&self) -> PublicTarget {
        self.target.public()
    }
}
