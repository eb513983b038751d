//! Event bus for tracking events of one call

use dispatch_core::{EventType, TrackingEvent};

use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

const DEFAULT_HISTORY: usize = 256;

/// Event bus shared by the tracker, the session and every screen watching
pub struct EventBus {
    sender: broadcast::Sender<TrackingEvent>,
    history: Arc<RwLock<VecDeque<TrackingEvent>>>,
    max_history: usize,
    event_count: Arc<RwLock<u64>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(DEFAULT_HISTORY))),
            max_history: DEFAULT_HISTORY,
            event_count: Arc::new(RwLock::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.sender.subscribe()
    }

    /// Events as a stream; lagged receivers skip what they missed
    pub fn stream(&self) -> impl Stream<Item = TrackingEvent> + Send + use<> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Tracking event stream lagged");
                    None
                }
            }
        })
    }

    pub fn publish(&self, event: TrackingEvent) {
        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        *self.event_count.write() += 1;

        debug!(call_id = %event.call_id, event_type = ?event.event_type, "Tracking event");
        let _ = self.sender.send(event);
    }

    /// Most recent `count` events, oldest first
    pub fn recent(&self, count: usize) -> Vec<TrackingEvent> {
        let history = self.history.read();
        let start = history.len().saturating_sub(count);
        history.iter().skip(start).cloned().collect()
    }

    /// Most recent event of a given type
    pub fn last_of(&self, event_type: EventType) -> Option<TrackingEvent> {
        self.history
            .read()
            .iter()
            .rev()
            .find(|e| e.event_type == event_type)
            .cloned()
    }

    pub fn event_count(&self) -> u64 {
        *self.event_count.read()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            history: self.history.clone(),
            max_history: self.max_history,
            event_count: self.event_count.clone(),
        }
    }
}
