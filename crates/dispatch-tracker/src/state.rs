//! Tracker state and snapshots

use dispatch_core::{CallId, Coordinate, EtaEstimate, RoutePolyline, RouteResult};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Mutable state of one route tracker
#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    /// Route from the responder to the patient, shrinking as it is driven
    pub remaining_route: RoutePolyline,
    /// Provider travel time for the current route
    pub duration_seconds: Option<f64>,
    pub last_known_position: Option<Coordinate>,
    /// Position the current route was computed from
    pub recalculation_origin: Option<Coordinate>,
    pub last_recalculation: Option<Instant>,
    pub updates_accepted: u64,
    pub recalculations: u64,
}

impl TrackerState {
    /// Replace the route with a freshly computed one
    pub fn apply_route(&mut self, route: RouteResult, origin: Coordinate) {
        self.remaining_route = route.coords;
        self.duration_seconds = route.duration_seconds;
        self.recalculation_origin = Some(origin);
        self.last_recalculation = Some(Instant::now());
        self.recalculations += 1;
    }

    /// Drop the points already driven past `position`; returns how many went
    pub fn trim_to(&mut self, position: Coordinate, radius_m: f64) -> usize {
        let removed = self
            .remaining_route
            .traversed_prefix_len(position, radius_m)
            .unwrap_or(0);
        if removed > 0 {
            self.remaining_route = self.remaining_route.suffix(removed);
        }
        removed
    }

    /// Remaining distance, `None` while there is no route
    pub fn distance_remaining_km(&self) -> Option<f64> {
        (!self.remaining_route.is_empty()).then(|| self.remaining_route.length_km())
    }

    pub fn eta(&self, fallback_speed_kmh: f64) -> EtaEstimate {
        match self.distance_remaining_km() {
            Some(km) => {
                EtaEstimate::from_route(Some(km), self.duration_seconds, fallback_speed_kmh)
            }
            None => EtaEstimate::unknown(),
        }
    }
}

/// Behavioral phase of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPhase {
    /// No route yet
    Idle,
    Tracking,
    /// A debounced recalculation is waiting to fire
    RecalculationPending,
    /// Responder within arrival distance of the patient
    Arrived,
    /// Shut down
    Stopped,
}

/// Point-in-time view of a tracker for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub call_id: CallId,
    pub phase: TrackerPhase,
    pub destination: Coordinate,
    pub position: Option<Coordinate>,
    pub remaining_points: usize,
    pub eta: EtaEstimate,
    pub provider_in_flight: bool,
    pub recalculations: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TrackerSnapshot {
    /// One-line summary, e.g. `"1.2 km · 3 min"`
    pub fn summary(&self) -> String {
        format!("{} · {}", self.eta.display_distance(), self.eta.display_eta())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state_has_no_eta() {
        let state = TrackerState::default();
        assert!(state.distance_remaining_km().is_none());
        assert_eq!(state.eta(60.0), EtaEstimate::unknown());
    }

    #[test]
    fn test_apply_route_sets_baseline() {
        let mut state = TrackerState::default();
        let origin = Coordinate::new(-25.4284, -49.2733);
        let route = RouteResult::new(vec![origin, Coordinate::new(-25.4300, -49.2750)], Some(90.0));

        state.apply_route(route, origin);

        assert_eq!(state.recalculation_origin, Some(origin));
        assert!(state.last_recalculation.is_some());
        let eta = state.eta(60.0);
        assert_eq!(eta.minutes(), Some(1.5));
        let km = eta.distance_remaining_km.unwrap();
        assert!((0.207..0.253).contains(&km));
    }

    #[test]
    fn test_trim_to_cuts_driven_prefix() {
        let mut state = TrackerState::default();
        let points: Vec<_> = (0..5).map(|i| Coordinate::new(i as f64 * 0.01, 0.0)).collect();
        state.apply_route(RouteResult::new(points, None), Coordinate::new(0.0, 0.0));

        assert_eq!(state.trim_to(Coordinate::new(0.02, 0.0), 100.0), 2);
        assert_eq!(state.remaining_route.len(), 3);
        // Off the route
        assert_eq!(state.trim_to(Coordinate::new(0.02, 0.5), 100.0), 0);
        assert_eq!(state.remaining_route.len(), 3);
    }
}
