//! # Dispatch Realtime
//!
//! Change subscriptions for call records. A [`ChangeFeed`] hands out
//! [`Subscription`]s that yield [`ChangeEvent`]s until cancelled.
//!
//! Three feeds are provided:
//! - [`ChangeHub`]: in-process fan-out
//! - [`PollingFeed`]: periodic `list_calls` with snapshot diffing
//! - [`RealtimeFeed`]: the backend's websocket change channel

pub mod error;
pub mod hub;
pub mod polling;
pub mod realtime;

pub use error::{FeedError, FeedResult};
pub use hub::ChangeHub;
pub use polling::{diff_snapshots, PollingFeed};
pub use realtime::RealtimeFeed;

use dispatch_core::{CallFilter, ChangeEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Source of call record changes
pub trait ChangeFeed: Send + Sync {
    /// Start delivering changes for rows matching `filter`
    fn subscribe(&self, filter: CallFilter) -> Subscription;
}

/// Handle to a live change subscription.
///
/// Dropping the handle cancels it.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        id: Uuid,
        receiver: mpsc::UnboundedReceiver<ChangeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            receiver,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next change, `None` once cancelled or the feed has stopped
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.receiver.recv() => event,
        }
    }

    /// Stop delivery. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that fires when this subscription is cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
