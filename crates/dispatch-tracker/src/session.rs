//! Call session: binds one call record to one route tracker.
//!
//! Positions arrive either from backend change events (dispatcher and
//! family views) or from the device GPS (responder view). Lifecycle
//! actions are written to the backend first and only then reflected
//! locally, so a failed write never advances the call.

use dispatch_backend::CallRepository;
use dispatch_core::{
    haversine_distance_meters, CallFilter, CallId, CallPatch, CallRecord, CallStatus, ChangeEvent,
    ChangeKind, Coordinate, EtaEstimate, TrackingEvent,
};
use dispatch_realtime::{ChangeFeed, Subscription};
use dispatch_routing::RouteProviderClient;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{RouteTracker, UpdateOutcome};
use crate::error::{SessionError, SessionResult};
use crate::events::EventBus;
use crate::state::TrackerSnapshot;
use crate::TrackerConfig;

struct SessionInner {
    call_id: CallId,
    repository: Arc<dyn CallRepository>,
    tracker: RouteTracker,
    /// Locally displayed copy of the call
    record: RwLock<CallRecord>,
    arrival_announced: AtomicBool,
    subscription: Mutex<Option<CancellationToken>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Live session for one emergency call
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl CallSession {
    /// Load the call, subscribe to its changes and start tracking.
    ///
    /// Configuration and authentication failures are returned before any
    /// tracking starts.
    pub async fn start(
        call_id: CallId,
        repository: Arc<dyn CallRepository>,
        feed: &dyn ChangeFeed,
        provider: Arc<RouteProviderClient>,
        config: TrackerConfig,
    ) -> SessionResult<Self> {
        let record = repository.fetch_call(call_id).await?;

        if record.status.is_terminal() {
            return Err(SessionError::CallClosed {
                id: call_id,
                status: record.status,
            });
        }

        let destination = record
            .call_coordinate()
            .ok_or(SessionError::MissingLocation(call_id))?;
        let responder_position = record.responder_position();

        let tracker = RouteTracker::new(call_id, destination, provider, config);
        let session = Self {
            inner: Arc::new(SessionInner {
                call_id,
                repository,
                tracker,
                record: RwLock::new(record),
                arrival_announced: AtomicBool::new(false),
                subscription: Mutex::new(None),
                listener: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };

        let subscription = feed.subscribe(CallFilter::call(call_id));
        *session.inner.subscription.lock() = Some(subscription.cancel_token());
        let listener = tokio::spawn(listen(Arc::downgrade(&session.inner), subscription));
        *session.inner.listener.lock() = Some(listener);

        if let Some(position) = responder_position {
            session.inner.begin_route(position);
            session.inner.check_arrival(position);
        }

        info!(
            call_id = %call_id,
            %destination,
            responder = ?responder_position,
            "Call session started"
        );
        Ok(session)
    }

    pub fn call_id(&self) -> CallId {
        self.inner.call_id
    }

    /// Locally displayed call record
    pub fn record(&self) -> CallRecord {
        self.inner.record.read().clone()
    }

    pub fn status(&self) -> CallStatus {
        self.inner.record.read().status
    }

    pub fn eta(&self) -> EtaEstimate {
        self.inner.tracker.eta()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.inner.tracker.snapshot()
    }

    pub fn tracker(&self) -> &RouteTracker {
        &self.inner.tracker
    }

    pub fn events(&self) -> &EventBus {
        self.inner.tracker.events()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Apply a change to the call record
    pub fn on_backend_change(&self, change: ChangeEvent) {
        self.inner.apply_change(change);
    }

    /// Position from the device GPS. Also pushed to the backend; a failed
    /// push is logged and does not affect tracking.
    pub async fn on_device_position(&self, position: Coordinate) -> UpdateOutcome {
        if self.is_closed() {
            return UpdateOutcome::Stopped;
        }

        let outcome = self.inner.track(position);
        if !matches!(outcome, UpdateOutcome::Seeded | UpdateOutcome::Accepted { .. }) {
            return outcome;
        }

        // Keep the local copy in step so the feed echo reads as unchanged
        self.inner.record.write().responder_initial_position = Some(position.to_string());

        if let Err(e) = self
            .inner
            .repository
            .update_call(self.inner.call_id, CallPatch::responder_position(position))
            .await
        {
            warn!(call_id = %self.inner.call_id, error = %e, "Failed to push responder position");
        }

        outcome
    }

    /// Responder confirmed arrival; writes `on_site`
    pub async fn on_arrival_confirmed(&self) -> SessionResult<CallRecord> {
        self.write_status(CallPatch::status(CallStatus::OnSite)).await
    }

    /// Call attended; writes `completed` with the closing time and tears down
    pub async fn on_completion(&self) -> SessionResult<CallRecord> {
        let patch = CallPatch::status(CallStatus::Completed).closed_at(Utc::now());
        let record = self.write_status(patch).await?;
        self.teardown();
        Ok(record)
    }

    /// Call closed without completion; writes `finalized` and tears down
    pub async fn on_cancellation(&self) -> SessionResult<CallRecord> {
        let record = self.write_status(CallPatch::status(CallStatus::Finalized)).await?;
        self.teardown();
        Ok(record)
    }

    /// Stop listening for changes and stop the tracker. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    async fn write_status(&self, patch: CallPatch) -> SessionResult<CallRecord> {
        let call_id = self.inner.call_id;
        if self.is_closed() {
            return Err(SessionError::SessionClosed(call_id));
        }

        let requested = patch.status;
        let updated = self
            .inner
            .repository
            .update_call(call_id, patch)
            .await
            .map_err(|e| {
                error!(call_id = %call_id, status = ?requested, error = %e, "Status write failed");
                SessionError::from(e)
            })?;

        info!(call_id = %call_id, status = %updated.status, "Call status written");
        self.inner.replace_record(updated.clone());
        Ok(updated)
    }
}

impl SessionInner {
    fn apply_change(&self, change: ChangeEvent) {
        if self.closed.load(Ordering::Acquire) || change.call_id() != Some(self.call_id) {
            return;
        }

        if change.event_type == ChangeKind::Delete {
            warn!(call_id = %self.call_id, "Call was deleted");
            self.teardown();
            return;
        }

        let Some(updated) = change.new else {
            return;
        };

        let position_changed =
            self.record.read().responder_initial_position != updated.responder_initial_position;
        let position = updated.responder_position();
        if position_changed && updated.responder_initial_position.is_some() && position.is_none() {
            debug!(call_id = %self.call_id, "Unreadable responder position, ignoring");
        }

        let status = updated.status;
        self.replace_record(updated);

        if let Some(position) = position.filter(|_| position_changed) {
            self.track(position);
        }

        if status.is_terminal() {
            self.teardown();
        }
    }

    /// Store a newer copy of the call, publishing a status change if any
    fn replace_record(&self, updated: CallRecord) {
        let old_status = std::mem::replace(&mut *self.record.write(), updated.clone()).status;

        if old_status != updated.status {
            info!(
                call_id = %self.call_id,
                from = %old_status,
                to = %updated.status,
                "Call status changed"
            );
            self.tracker.events().publish(TrackingEvent::status_changed(
                self.call_id,
                old_status,
                updated.status,
            ));
        }
    }

    fn track(&self, position: Coordinate) -> UpdateOutcome {
        let outcome = self.tracker.on_position_update(position);

        if outcome == UpdateOutcome::Seeded && self.tracker.remaining_route().is_empty() {
            self.begin_route(position);
        }
        if matches!(outcome, UpdateOutcome::Seeded | UpdateOutcome::Accepted { .. }) {
            self.check_arrival(position);
        }

        outcome
    }

    /// Fetch the first route in the background
    fn begin_route(&self, origin: Coordinate) {
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            if !tracker.establish_route(origin).await {
                debug!(call_id = %tracker.call_id(), "Initial route not available yet");
            }
        });
    }

    /// Announce arrival once when the responder reaches the patient
    fn check_arrival(&self, position: Coordinate) {
        let distance_m = haversine_distance_meters(position, self.tracker.destination());
        if distance_m > self.tracker.config().arrival_radius_m {
            return;
        }

        if !self.arrival_announced.swap(true, Ordering::AcqRel) {
            info!(call_id = %self.call_id, distance_m, "Responder arrived");
            self.tracker.events().publish(TrackingEvent::responder_arrived(
                self.call_id,
                position,
                distance_m,
            ));
        }
    }

    fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(token) = self.subscription.lock().take() {
            token.cancel();
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.tracker.shutdown();

        let final_status = self.record.read().status;
        self.tracker
            .events()
            .publish(TrackingEvent::session_closed(self.call_id, Some(final_status)));
        info!(call_id = %self.call_id, status = %final_status, "Call session closed");
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Forward feed changes to the session while it is alive
async fn listen(session: Weak<SessionInner>, mut subscription: Subscription) {
    while let Some(change) = subscription.next().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.apply_change(change);
    }
    debug!("Session change listener finished");
}

// ============================================================================
// TESTS
// ============================================================================
