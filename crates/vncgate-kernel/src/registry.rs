//! Target registry: deduplicated target store with a lossy pub/sub fan-out.
//!
//! Entries are keyed by [`Fingerprint`]. Every mutation is published to all
//! subscribers through bounded channels using `try_send`: when a subscriber's
//! queue is full the event is dropped for that subscriber only, so a slow
//! observer can never stall discovery. Subscribers must tolerate gaps.
//!
//! The entry map and the subscriber list sit behind separate locks. Publishing
//! happens while the entry write lock is held, which keeps per-subscriber
//! event order identical to mutation order; this is cheap because delivery
//! never blocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use vncgate_types::event::ChangeEvent;
use vncgate_types::target::{Fingerprint, TargetDescriptor};

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The receiving half of a registry subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::Receiver<ChangeEvent>,
}

struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::Sender<ChangeEvent>,
}

/// Concurrency-safe store of reachable targets.
pub struct TargetRegistry {
    entries: RwLock<HashMap<Fingerprint, TargetDescriptor>>,
    subscribers: RwLock<Vec<Subscriber>>,
    capacity: usize,
    next_subscription: AtomicU64,
    dropped: AtomicU64,
}

impl TargetRegistry {
    /// Create an empty registry with the default subscriber capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create an empty registry whose subscribers buffer `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
            next_subscription: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Insert a target unless one with the same fingerprint exists.
    ///
    /// Returns `true` if the target was inserted (and an `Added` event
    /// published), `false` for a duplicate.
    pub fn add(&self, target: TargetDescriptor) -> bool {
        let fingerprint = target.fingerprint();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&fingerprint) {
            debug!(fingerprint = %fingerprint, target = %target, "Ignoring already added target");
            return false;
        }

        info!(fingerprint = %fingerprint, target = %target, "Adding target");
        entries.insert(fingerprint, target.clone());
        self.publish(ChangeEvent::added(target));
        true
    }

    /// Remove every target whose address equals `address`.
    ///
    /// One `Removed` event is published per removed entry. Returns the
    /// number of entries removed.
    pub fn remove_by_address(&self, address: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, t)| t.address == address)
            .map(|(fp, _)| *fp)
            .collect();

        for fingerprint in &doomed {
            if let Some(target) = entries.remove(fingerprint) {
                info!(fingerprint = %fingerprint, target = %target, "Removing target");
                self.publish(ChangeEvent::removed(target));
            }
        }

        if doomed.is_empty() {
            debug!(address, "No target registered at address");
        }
        doomed.len()
    }

    /// Point-in-time copy of all entries.
    pub fn list(&self) -> HashMap<Fingerprint, TargetDescriptor> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }

    /// Look up a single target.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<TargetDescriptor> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(fingerprint).cloned()
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Whether the registry holds no targets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (sender, events) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.push(Subscriber { id, sender });
        debug!(subscription = id.0, total = subscribers.len(), "Subscriber added");
        Subscription { id, events }
    }

    /// Deregister a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| s.id != id);
        debug!(subscription = id.0, total = subscribers.len(), "Subscriber removed");
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        subscribers.len()
    }

    /// Total events dropped because a subscriber queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn publish(&self, event: ChangeEvent) {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        for subscriber in subscribers.iter() {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        subscription = subscriber.id.0,
                        kind = %event.kind,
                        fingerprint = %event.fingerprint,
                        "Dropping event due to full subscriber queue"
                    );
                }
                // Receiver gone; the owner unsubscribes on its way out.
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
