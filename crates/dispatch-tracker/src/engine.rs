//! Route tracker: trims the remaining route as the responder moves and
//! decides when a fresh route is worth asking the provider for.

use dispatch_core::{
    flat_distance_meters, haversine_distance_meters, CallId, Coordinate, EtaEstimate, RoutePolyline,
    TrackingEvent,
};
use dispatch_routing::{RouteFetch, RouteProviderClient};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::EventBus;
use crate::state::{TrackerPhase, TrackerSnapshot, TrackerState};
use crate::TrackerConfig;

/// What a position update did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First known position; stored as the baseline
    Seeded,
    /// Closer than the jitter threshold to the last position
    Jitter,
    Accepted {
        removed_points: usize,
        recalculation_scheduled: bool,
    },
    /// Not a usable coordinate
    Invalid,
    /// Tracker was shut down
    Stopped,
}

/// Debounced recalculation waiting to fire
struct PendingRecalculation {
    generation: u64,
    handle: JoinHandle<()>,
}

struct TrackerInner {
    call_id: CallId,
    destination: Coordinate,
    config: TrackerConfig,
    provider: Arc<RouteProviderClient>,
    state: RwLock<TrackerState>,
    pending: Mutex<Option<PendingRecalculation>>,
    generation: AtomicU64,
    events: EventBus,
    shutdown: CancellationToken,
}

/// Tracks one responder towards one destination.
///
/// Cheap to clone; clones share state. All provider access goes through
/// the shared [`RouteProviderClient`].
#[derive(Clone)]
pub struct RouteTracker {
    inner: Arc<TrackerInner>,
}

impl RouteTracker {
    pub fn new(
        call_id: CallId,
        destination: Coordinate,
        provider: Arc<RouteProviderClient>,
        config: TrackerConfig,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self::with_events(call_id, destination, provider, config, events)
    }

    /// Tracker publishing onto an existing bus
    pub fn with_events(
        call_id: CallId,
        destination: Coordinate,
        provider: Arc<RouteProviderClient>,
        config: TrackerConfig,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                call_id,
                destination,
                config,
                provider,
                state: RwLock::new(TrackerState::default()),
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.inner.call_id
    }

    pub fn destination(&self) -> Coordinate {
        self.inner.destination
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn remaining_route(&self) -> RoutePolyline {
        self.inner.state.read().remaining_route.clone()
    }

    pub fn last_known_position(&self) -> Option<Coordinate> {
        self.inner.state.read().last_known_position
    }

    pub fn state(&self) -> TrackerState {
        self.inner.state.read().clone()
    }

    pub fn is_recalculation_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Request the initial route right away, without debounce.
    ///
    /// Seeds the position when none is known yet. Returns whether a route
    /// was installed.
    pub async fn establish_route(&self, origin: Coordinate) -> bool {
        if self.is_stopped() || !origin.is_valid() {
            return false;
        }

        {
            let mut state = self.inner.state.write();
            state.last_known_position.get_or_insert(origin);
            state.recalculation_origin.get_or_insert(origin);
        }

        info!(call_id = %self.inner.call_id, %origin, "Establishing route");
        self.inner.refresh_route(origin).await
    }

    /// Feed a new responder position
    pub fn on_position_update(&self, position: Coordinate) -> UpdateOutcome {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return UpdateOutcome::Stopped;
        }
        if !position.is_valid() {
            warn!(call_id = %inner.call_id, %position, "Ignoring invalid responder position");
            return UpdateOutcome::Invalid;
        }

        let mut state = inner.state.write();

        let Some(last) = state.last_known_position else {
            state.last_known_position = Some(position);
            state.recalculation_origin = Some(position);
            drop(state);
            debug!(call_id = %inner.call_id, %position, "Tracker seeded");
            inner.events.publish(TrackingEvent::position_updated(inner.call_id, position));
            return UpdateOutcome::Seeded;
        };

        let moved = flat_distance_meters(last, position);
        if moved < inner.config.jitter_threshold_m {
            return UpdateOutcome::Jitter;
        }

        state.last_known_position = Some(position);
        state.updates_accepted += 1;

        let removed_points = state.trim_to(position, inner.config.trim_radius_m);
        let remaining_points = state.remaining_route.len();

        let baseline = state.recalculation_origin.unwrap_or(position);
        let drifted =
            haversine_distance_meters(baseline, position) > inner.config.recalculation_distance_m;
        let interval_elapsed = state
            .last_recalculation
            .is_none_or(|at| at.elapsed() >= inner.config.min_recalculation_interval());
        let eta = state.eta(inner.config.fallback_speed_kmh);
        drop(state);

        // Without a route any move is worth a retry, but a waiting one is left alone
        let missing_route = remaining_points == 0 && !self.is_recalculation_pending();
        let recalculation_scheduled =
            (drifted || missing_route) && interval_elapsed && !inner.provider.is_in_flight();
        if recalculation_scheduled {
            self.schedule_recalculation();
        }

        inner.events.publish(TrackingEvent::position_updated(inner.call_id, position));
        if removed_points > 0 {
            inner.events.publish(TrackingEvent::route_trimmed(
                inner.call_id,
                removed_points,
                remaining_points,
            ));
        }
        inner.events.publish(TrackingEvent::eta_updated(inner.call_id, eta));

        UpdateOutcome::Accepted {
            removed_points,
            recalculation_scheduled,
        }
    }

    /// Start or restart the debounce timer
    fn schedule_recalculation(&self) {
        // Held across the spawn so the task never sees a stale slot
        let mut pending = self.inner.pending.lock();

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let weak: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.config.debounce();
        let shutdown = self.inner.shutdown.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(inner) = weak.upgrade() {
                inner.fire_recalculation(generation).await;
            }
        });

        if let Some(previous) = pending.replace(PendingRecalculation { generation, handle }) {
            previous.handle.abort();
            debug!(call_id = %self.inner.call_id, "Debounce restarted");
        } else {
            debug!(call_id = %self.inner.call_id, delay = ?delay, "Recalculation scheduled");
        }
    }

    /// Distance and ETA for display
    pub fn eta(&self) -> EtaEstimate {
        self.inner.state.read().eta(self.inner.config.fallback_speed_kmh)
    }

    pub fn phase(&self) -> TrackerPhase {
        if self.is_stopped() {
            return TrackerPhase::Stopped;
        }

        let state = self.inner.state.read();
        let destination = self.inner.destination;
        let arrival_radius_m = self.inner.config.arrival_radius_m;
        let arrived = state
            .last_known_position
            .is_some_and(|p| haversine_distance_meters(p, destination) <= arrival_radius_m);

        if arrived {
            TrackerPhase::Arrived
        } else if self.is_recalculation_pending() {
            TrackerPhase::RecalculationPending
        } else if state.remaining_route.is_empty() {
            TrackerPhase::Idle
        } else {
            TrackerPhase::Tracking
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let phase = self.phase();
        let state = self.inner.state.read();

        TrackerSnapshot {
            call_id: self.inner.call_id,
            phase,
            destination: self.inner.destination,
            position: state.last_known_position,
            remaining_points: state.remaining_route.len(),
            eta: state.eta(self.inner.config.fallback_speed_kmh),
            provider_in_flight: self.inner.provider.is_in_flight(),
            recalculations: state.recalculations,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Stop tracking and cancel any pending recalculation. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();

        if let Some(pending) = self.inner.pending.lock().take() {
            pending.handle.abort();
        }
        info!(call_id = %self.inner.call_id, "Route tracker stopped");
    }
}

impl TrackerInner {
    /// Debounce elapsed; run only if no newer schedule superseded this one
    async fn fire_recalculation(&self, generation: u64) {
        {
            let mut pending = self.pending.lock();
            match pending.as_ref() {
                Some(p) if p.generation == generation => {
                    // Detach: a newer schedule must not abort a running request
                    pending.take();
                }
                _ => return,
            }
        }

        let Some(origin) = self.state.read().last_known_position else {
            return;
        };
        self.refresh_route(origin).await;
    }

    /// Ask the provider for a route from `origin`; keeps the current one on failure
    async fn refresh_route(&self, origin: Coordinate) -> bool {
        let fetched = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return false,
            fetched = self.provider.try_fetch_route(origin, self.destination) => fetched,
        };

        match fetched {
            Ok(RouteFetch::Route(route)) if !route.is_empty() => {
                let duration_seconds = route.duration_seconds;
                let (remaining_points, eta) = {
                    let mut state = self.state.write();
                    state.apply_route(route, origin);
                    // The responder may have kept driving while the request ran
                    if let Some(position) = state.last_known_position {
                        state.trim_to(position, self.config.trim_radius_m);
                    }
                    (state.remaining_route.len(), state.eta(self.config.fallback_speed_kmh))
                };

                info!(
                    call_id = %self.call_id,
                    points = remaining_points,
                    duration_seconds = ?duration_seconds,
                    "Route recalculated"
                );
                self.events.publish(TrackingEvent::route_recalculated(
                    self.call_id,
                    remaining_points,
                    duration_seconds,
                ));
                self.events.publish(TrackingEvent::eta_updated(self.call_id, eta));
                true
            }
            Ok(RouteFetch::Busy) => {
                debug!(call_id = %self.call_id, "Provider busy, recalculation abandoned");
                false
            }
            Ok(RouteFetch::Route(_)) | Ok(RouteFetch::Unavailable) => {
                self.mark_attempt();
                debug!(call_id = %self.call_id, "No route available, keeping current route");
                false
            }
            Err(e) => {
                self.mark_attempt();
                warn!(
                    call_id = %self.call_id,
                    error = %e,
                    "Route recalculation failed, keeping current route"
                );
                false
            }
        }
    }

    fn mark_attempt(&self) {
        self.state.write().last_recalculation = Some(tokio::time::Instant::now());
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dispatch_core::{RouteResult, PLACEHOLDER};
    use dispatch_routing::{ProviderReply, RouteCache, RouteTransport, RoutingConfig, RoutingResult};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Provider that answers with a straight line and counts requests
    #[derive(Default)]
    struct StraightLine {
        calls: AtomicUsize,
        /// Requests answered with no route before lines come back
        failures: AtomicUsize,
        delay: Duration,
    }

    impl StraightLine {
        fn failing(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                ..Default::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RouteTransport for StraightLine {
        async fn request_route(
            &self,
            origin: Coordinate,
            destination: Coordinate,
        ) -> RoutingResult<ProviderReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Ok(ProviderReply::NoRoute);
            }
            let points = (0..=10)
                .map(|i| {
                    let t = i as f64 / 10.0;
                    Coordinate::new(
                        origin.latitude + (destination.latitude - origin.latitude) * t,
                        origin.longitude + (destination.longitude - origin.longitude) * t,
                    )
                })
                .collect::<Vec<_>>();
            Ok(ProviderReply::Route(RouteResult::new(points, Some(600.0))))
        }
    }

    fn shared_provider(transport: Arc<StraightLine>) -> Arc<RouteProviderClient> {
        Arc::new(RouteProviderClient::new(
            RoutingConfig::default(),
            transport,
            Arc::new(RouteCache::new()),
        ))
    }

    fn destination() -> Coordinate {
        Coordinate::new(0.05, 0.0)
    }

    fn tracker_with(transport: Arc<StraightLine>) -> RouteTracker {
        tracker_on(shared_provider(transport), destination())
    }

    fn tracker_on(provider: Arc<RouteProviderClient>, destination: Coordinate) -> RouteTracker {
        RouteTracker::new(CallId::new(), destination, provider, TrackerConfig::default())
    }

    #[tokio::test]
    async fn test_first_update_seeds_without_recalculation() {
        let tracker = tracker_with(Arc::default());

        assert_eq!(tracker.on_position_update(Coordinate::new(0.0, 0.0)), UpdateOutcome::Seeded);
        assert!(tracker.remaining_route().is_empty());
        assert!(!tracker.is_recalculation_pending());
        assert_eq!(tracker.phase(), TrackerPhase::Idle);
        assert_eq!(tracker.eta().display_eta(), PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_jitter_is_ignored() {
        let tracker = tracker_with(Arc::default());
        tracker.on_position_update(Coordinate::new(0.0, 0.0));

        // ~33 m
        assert_eq!(tracker.on_position_update(Coordinate::new(0.0003, 0.0)), UpdateOutcome::Jitter);
        assert_eq!(tracker.last_known_position(), Some(Coordinate::new(0.0, 0.0)));
    }

    #[tokio::test]
    async fn test_invalid_position_is_ignored() {
        let tracker = tracker_with(Arc::default());
        assert_eq!(tracker.on_position_update(Coordinate::new(120.0, 0.0)), UpdateOutcome::Invalid);
        assert!(tracker.last_known_position().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_then_trim() {
        let transport = Arc::new(StraightLine::default());
        let tracker = tracker_with(transport.clone());

        assert!(tracker.establish_route(Coordinate::new(0.0, 0.0)).await);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.remaining_route().len(), 11);
        assert_eq!(tracker.phase(), TrackerPhase::Tracking);
        let before = tracker.remaining_route().length_km();

        // Points every ~556 m; stand on the third one
        let outcome = tracker.on_position_update(Coordinate::new(0.01, 0.0));
        assert_eq!(
            outcome,
            UpdateOutcome::Accepted {
                removed_points: 2,
                recalculation_scheduled: false
            }
        );
        assert_eq!(tracker.remaining_route().len(), 9);
        assert!(tracker.remaining_route().length_km() < before);
        assert!(tracker.events().last_of(dispatch_core::EventType::RouteTrimmed).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_failure_keeps_route_and_records_attempt() {
        let transport = Arc::new(StraightLine::default());
        let tracker = tracker_with(transport.clone());
        assert!(tracker.establish_route(Coordinate::new(0.0, 0.0)).await);
        let route = tracker.remaining_route();

        let other = tracker_with(Arc::new(StraightLine::failing(1)));
        assert!(!other.establish_route(Coordinate::new(0.0, 0.0)).await);
        assert!(other.remaining_route().is_empty());
        assert!(other.state().last_recalculation.is_some());

        assert_eq!(tracker.remaining_route(), route);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_recalculation() {
        let transport = Arc::new(StraightLine::default());
        let tracker = tracker_with(transport.clone());
        tracker.on_position_update(Coordinate::new(0.0, 0.0));

        // ~1.1 km from the baseline
        let outcome = tracker.on_position_update(Coordinate::new(0.01, 0.0));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: true, .. }));
        assert_eq!(tracker.phase(), TrackerPhase::RecalculationPending);

        tracker.shutdown();
        tracker.shutdown();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.phase(), TrackerPhase::Stopped);
        assert_eq!(tracker.on_position_update(Coordinate::new(0.02, 0.0)), UpdateOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recalculation_respects_min_interval() {
        let transport = Arc::new(StraightLine::default());
        let tracker = tracker_with(transport.clone());
        assert!(tracker.establish_route(Coordinate::new(0.0, 0.0)).await);

        // Far enough, but the last recalculation was just now
        let outcome = tracker.on_position_update(Coordinate::new(0.01, 0.0));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: false, .. }));

        tokio::time::advance(Duration::from_secs(16)).await;
        let outcome = tracker.on_position_update(Coordinate::new(0.02, 0.0));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: true, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_phase() {
        let tracker = tracker_with(Arc::default());
        tracker.on_position_update(Coordinate::new(0.0, 0.0));
        tracker.on_position_update(Coordinate::new(0.0498, 0.0));
        assert_eq!(tracker.phase(), TrackerPhase::Arrived);
        assert_eq!(tracker.snapshot().phase, TrackerPhase::Arrived);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_route_retried_on_next_move() {
        let transport = Arc::new(StraightLine::failing(1));
        let tracker = tracker_with(transport.clone());
        assert!(!tracker.establish_route(Coordinate::new(0.0, 0.0)).await);
        assert_eq!(tracker.phase(), TrackerPhase::Idle);

        // The failed attempt still counts towards the minimum interval
        let outcome = tracker.on_position_update(Coordinate::new(0.001, 0.0));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: false, .. }));

        // ~220 m from the failed origin, well short of the recalculation distance
        tokio::time::sleep(Duration::from_secs(16)).await;
        let outcome = tracker.on_position_update(Coordinate::new(0.002, 0.0));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: true, .. }));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.phase(), TrackerPhase::Tracking);
        assert_eq!(tracker.remaining_route().origin(), Some(Coordinate::new(0.002, 0.0)));
        assert_ne!(tracker.eta().display_eta(), PLACEHOLDER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_first_route_retried_on_next_move() {
        let transport = Arc::new(StraightLine::slow(Duration::from_secs(5)));
        let provider = shared_provider(transport.clone());
        let first = tracker_on(provider.clone(), destination());
        let second = tracker_on(provider.clone(), Coordinate::new(0.0, 0.05));

        let establishing = {
            let first = first.clone();
            tokio::spawn(async move { first.establish_route(Coordinate::new(0.0, 0.0)).await })
        };
        tokio::task::yield_now().await;
        assert!(provider.is_in_flight());

        assert!(!second.establish_route(Coordinate::new(0.0, 0.0)).await);
        assert_eq!(second.phase(), TrackerPhase::Idle);
        assert!(second.state().last_recalculation.is_none());
        assert!(establishing.await.unwrap());

        // ~110 m, only the missing route makes this worth a request
        let outcome = second.on_position_update(Coordinate::new(0.0, 0.001));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: true, .. }));

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.phase(), TrackerPhase::Tracking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_provider_abandons_recalculation() {
        let transport = Arc::new(StraightLine::slow(Duration::from_secs(5)));
        let provider = shared_provider(transport.clone());
        let first = tracker_on(provider.clone(), destination());
        let second = tracker_on(provider.clone(), Coordinate::new(0.0, 0.05));

        // Second request waits out the 30 s call spacing
        assert!(first.establish_route(Coordinate::new(0.0, 0.0)).await);
        assert!(second.establish_route(Coordinate::new(0.0, 0.0)).await);
        tokio::time::sleep(Duration::from_secs(16)).await;

        let outcome = second.on_position_update(Coordinate::new(0.0, 0.01));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: true, .. }));
        let route = second.remaining_route();
        let last_recalculation = second.state().last_recalculation;

        // Holds the provider from before the debounce ends until well after
        let holding = {
            let first = first.clone();
            tokio::spawn(async move { first.establish_route(Coordinate::new(0.02, 0.0)).await })
        };
        tokio::time::sleep(Duration::from_millis(8500)).await;

        assert!(provider.is_in_flight());
        assert_eq!(provider.stats().rejected_in_flight, 1);
        assert!(!second.is_recalculation_pending());
        assert_eq!(second.remaining_route(), route);
        assert_eq!(second.state().last_recalculation, last_recalculation);

        assert!(holding.await.unwrap());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(second.state().recalculations, 1);
        assert!(!second.is_recalculation_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_route_trimmed_to_latest_position() {
        let transport = Arc::new(StraightLine::slow(Duration::from_secs(5)));
        let tracker = tracker_with(transport.clone());
        tracker.on_position_update(Coordinate::new(0.0, 0.0));

        let outcome = tracker.on_position_update(Coordinate::new(0.01, 0.0));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: true, .. }));

        // Debounce over, provider still answering
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(tracker.snapshot().provider_in_flight);

        // Third point of the route that is on its way
        let outcome = tracker.on_position_update(Coordinate::new(0.018, 0.0));
        assert!(matches!(outcome, UpdateOutcome::Accepted { recalculation_scheduled: false, .. }));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.remaining_route().len(), 9);
        assert_eq!(tracker.state().recalculation_origin, Some(Coordinate::new(0.01, 0.0)));
        assert_eq!(tracker.phase(), TrackerPhase::Tracking);
    }
}
