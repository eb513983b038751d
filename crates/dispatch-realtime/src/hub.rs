//! In-process change hub
//!
//! Fans change events out to every subscriber whose filter matches. Used
//! when several sessions in one process watch the same calls, and by tests.

use dispatch_core::{CallFilter, ChangeEvent};

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{ChangeFeed, Subscription};

/// State for one subscriber
#[derive(Debug)]
struct SubscriberState {
    filter: CallFilter,
    sender: mpsc::UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
    subscribed_at: chrono::DateTime<chrono::Utc>,
}

/// In-process change hub
pub struct ChangeHub {
    subscribers: DashMap<Uuid, SubscriberState>,
    message_count: AtomicUsize,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            message_count: AtomicUsize::new(0),
        }
    }

    /// Deliver an event to every matching subscriber.
    /// Returns how many subscribers received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.prune();

        let Some(record) = event.record() else {
            return 0;
        };

        let mut delivered = 0;
        for subscriber in self.subscribers.iter() {
            if subscriber.filter.matches(record) && subscriber.sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        debug!(call_id = ?event.call_id(), delivered, "Change published");
        delivered
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.prune();
        self.subscribers.len()
    }

    /// Total events published
    pub fn message_count(&self) -> usize {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Drop subscribers that cancelled or went away
    fn prune(&self) {
        self.subscribers.retain(|id, state| {
            let alive = !state.cancel.is_cancelled() && !state.sender.is_closed();
            if !alive {
                info!(
                    subscriber = %id,
                    since = %state.subscribed_at,
                    "Subscriber removed"
                );
            }
            alive
        });
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for ChangeHub {
    fn subscribe(&self, filter: CallFilter) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();

        self.subscribers.insert(
            id,
            SubscriberState {
                filter,
                sender,
                cancel: cancel.clone(),
                subscribed_at: chrono::Utc::now(),
            },
        );
        info!(subscriber = %id, "Subscriber registered ({} total)", self.subscribers.len());

        Subscription::new(id, receiver, cancel)
    }
}

// ============================================================================
// TESTS
// ============================================================================
