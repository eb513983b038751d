//! Change feed that polls the backend and diffs successive snapshots

use dispatch_backend::CallRepository;
use dispatch_core::{CallFilter, CallId, CallRecord, ChangeEvent};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{ChangeFeed, Subscription};

/// Polls `list_calls(filter)` on an interval
pub struct PollingFeed {
    repository: Arc<dyn CallRepository>,
    interval: Duration,
}

impl PollingFeed {
    pub fn new(repository: Arc<dyn CallRepository>, interval: Duration) -> Self {
        Self {
            repository,
            interval,
        }
    }
}

impl ChangeFeed for PollingFeed {
    fn subscribe(&self, filter: CallFilter) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();

        tokio::spawn(poll_loop(
            self.repository.clone(),
            filter,
            self.interval,
            sender,
            cancel.clone(),
        ));

        Subscription::new(id, receiver, cancel)
    }
}

async fn poll_loop(
    repository: Arc<dyn CallRepository>,
    filter: CallFilter,
    period: Duration,
    sender: mpsc::UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut snapshot: Option<HashMap<CallId, CallRecord>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let rows = match repository.list_calls(&filter).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Polling calls failed");
                continue;
            }
        };

        let next: HashMap<CallId, CallRecord> = rows.into_iter().map(|r| (r.id, r)).collect();

        // The first poll only establishes the baseline
        if let Some(previous) = snapshot.as_ref() {
            for event in diff_snapshots(previous, &next) {
                if sender.send(event).is_err() {
                    debug!("Polling subscriber gone, stopping");
                    return;
                }
            }
        }
        snapshot = Some(next);
    }

    debug!("Polling feed cancelled");
}

/// Changes between two snapshots keyed by call id
pub fn diff_snapshots(
    previous: &HashMap<CallId, CallRecord>,
    next: &HashMap<CallId, CallRecord>,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for (id, record) in next {
        match previous.get(id) {
            None => events.push(ChangeEvent::insert(record.clone())),
            Some(old) if old != record => {
                events.push(ChangeEvent::update(Some(old.clone()), record.clone()))
            }
            Some(_) => {}
        }
    }

    for (id, record) in previous {
        if !next.contains_key(id) {
            events.push(ChangeEvent::delete(record.clone()));
        }
    }

    events
}

// ============================================================================
// TESTS
// ============================================================================
