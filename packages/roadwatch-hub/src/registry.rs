use crate::traits::{HubError, HubResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Default maximum subscribers to prevent DoS
const DEFAULT_MAX_SUBSCRIBERS: usize = 1_000;

/// Default depth of each subscriber's outbound queue, in batches
const DEFAULT_QUEUE_DEPTH: usize = 32;

/// One serialized batch, shared by every subscriber queue
pub type BroadcastMessage = Arc<str>;

/// Opaque identifier of one subscriber channel. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriberHandle(u64);

impl std::fmt::Display for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Returned by [`SubscriberRegistry::register`]; the receiver yields every
/// batch broadcast while the handle stays registered.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriberHandle,
    pub receiver: mpsc::Receiver<BroadcastMessage>,
}

struct SubscriberEntry {
    sender: mpsc::Sender<BroadcastMessage>,
    connected_at: DateTime<Utc>,
}

/// In-memory registry of live subscriber channels
#[derive(Clone)]
pub struct SubscriberRegistry {
    subscribers: Arc<RwLock<HashMap<SubscriberHandle, SubscriberEntry>>>,
    next_handle: Arc<AtomicU64>,
    max_subscribers: usize,
    queue_depth: usize,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SUBSCRIBERS, DEFAULT_QUEUE_DEPTH)
    }

    /// Create registry with custom subscriber cap and per-subscriber queue depth
    pub fn with_limits(max_subscribers: usize, queue_depth: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_handle: Arc::new(AtomicU64::new(1)),
            max_subscribers,
            queue_depth: queue_depth.max(1),
        }
    }

    /// Open a new subscriber channel
    pub fn register(&self) -> HubResult<Subscription> {
        let mut subscribers = self.subscribers.write();

        if subscribers.len() >= self.max_subscribers {
            return Err(HubError::AtCapacity(self.max_subscribers));
        }

        let handle = SubscriberHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        subscribers.insert(
            handle,
            SubscriberEntry {
                sender,
                connected_at: Utc::now(),
            },
        );

        Ok(Subscription { handle, receiver })
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unregister(&self, handle: SubscriberHandle) -> bool {
        match self.subscribers.write().remove(&handle) {
            Some(entry) => {
                let connected_for = Utc::now() - entry.connected_at;
                debug!(
                    "Unregistered {} after {}s",
                    handle,
                    connected_for.num_seconds()
                );
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, handle: SubscriberHandle) -> bool {
        self.subscribers.read().contains_key(&handle)
    }

    /// Handles of all registered subscribers, oldest first
    pub fn active_handles(&self) -> Vec<SubscriberHandle> {
        let mut handles: Vec<_> = self.subscribers.read().keys().copied().collect();
        handles.sort();
        handles
    }

    /// Copy of the current senders so a broadcast can run without holding the lock
    pub fn snapshot(&self) -> Vec<(SubscriberHandle, mpsc::Sender<BroadcastMessage>)> {
        let mut senders: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .map(|(handle, entry)| (*handle, entry.sender.clone()))
            .collect();
        senders.sort_by_key(|(handle, _)| *handle);
        senders
    }

    pub fn connection_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
