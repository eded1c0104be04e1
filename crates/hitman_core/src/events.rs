//! # Hit Event Bus
//!
//! Domain events flow FROM the hit lifecycle TO the UI refresher, loggers and
//! any other listener:
//!
//! ```text
//! ┌─────────────┐      ┌─────────────┐      ┌──────────────┐
//! │ HitManager  │─────>│  EventBus   │─────>│ Leaderboard  │
//! │ Completion  │      │  (fan-out)  │─────>│ Logger       │
//! └─────────────┘      └─────────────┘      └──────────────┘
//! ```
//!
//! Every subscriber owns a bounded crossbeam channel. `emit` enqueues on all of
//! them before returning, so by the time a manager operation completes its
//! events are observable. Subscribers register and unregister explicitly at
//! process startup and shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use tracing::warn;

use crate::hit::{CombinedHit, Hit, PlayerId};

/// Events emitted by the hit lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HitEvent {
    /// A hit was stored.
    ///
    /// Emitted by: `HitManager::place_hit` (after commit)
    HitPlaced(Hit),

    /// A hit was removed by the expiry sweep. One event per hit.
    ///
    /// Emitted by: `HitManager::clear_expired_hits` (after the batch commit)
    HitExpired(Hit),

    /// A hit was removed explicitly.
    ///
    /// Emitted by: `HitManager::remove_hit`, only when a row was deleted
    HitRemoved(Hit),

    /// A target's bounty was collected.
    ///
    /// Emitted by: `CompletionHandler` after payout and notifications
    HitCompleted {
        /// The consumed combined hit.
        combined: CombinedHit,
        /// Player who collected it.
        killer_player_id: PlayerId,
    },
}

impl HitEvent {
    /// Whether this event changes the hit list (the UI's refresh signal).
    ///
    /// Every current variant does; the match keeps future variants honest.
    #[must_use]
    pub const fn is_list_update(&self) -> bool {
        match self {
            Self::HitPlaced(_)
            | Self::HitExpired(_)
            | Self::HitRemoved(_)
            | Self::HitCompleted { .. } => true,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::HitPlaced(_) => "HitPlaced",
            Self::HitExpired(_) => "HitExpired",
            Self::HitRemoved(_) => "HitRemoved",
            Self::HitCompleted { .. } => "HitCompleted",
        }
    }
}

/// Identifies a subscription for `unsubscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out event bus.
///
/// Pre-allocates one bounded channel per subscriber so a stalled listener
/// cannot grow memory without bound.
pub struct EventBus {
    /// Capacity of each subscriber channel.
    capacity: usize,
    subscribers: RwLock<Vec<(SubscriptionId, Sender<HitEvent>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates a new event bus.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum undrained events per subscriber before new
    ///   events are dropped for that subscriber. Use 1024 for a typical server.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        let (sender, receiver) = bounded(self.capacity);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, sender));
        EventReceiver { id, receiver }
    }

    /// Unregisters a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().retain(|(sub, _)| *sub != id);
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers `event` to every subscriber (non-blocking).
    ///
    /// Returns the number of subscribers that received it. Subscribers whose
    /// receiver was dropped are pruned.
    pub fn emit(&self, event: &HitEvent) -> usize {
        let mut delivered = 0;
        let mut disconnected = Vec::new();

        for (id, sender) in self.subscribers.read().iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    // Listener is not draining; drop rather than stall the caller.
                    warn!("Event channel full for subscriber {:?}, dropped {}", id, event.name());
                }
                Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
            }
        }

        if !disconnected.is_empty() {
            self.subscribers
                .write()
                .retain(|(id, _)| !disconnected.contains(id));
        }

        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Handle for receiving events.
pub struct EventReceiver {
    id: SubscriptionId,
    receiver: Receiver<HitEvent>,
}

impl EventReceiver {
    /// The id to pass to [`EventBus::unsubscribe`].
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receives all pending events (non-blocking).
    ///
    /// Use this in a UI tick to process events without blocking.
    #[must_use]
    pub fn drain(&self) -> Vec<HitEvent> {
        let mut events = Vec::with_capacity(self.receiver.len());
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Receives one event (non-blocking).
    #[must_use]
    pub fn try_recv(&self) -> Option<HitEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receives one event, blocking up to `timeout`.
    #[must_use]
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<HitEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}
