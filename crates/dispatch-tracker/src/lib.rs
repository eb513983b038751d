//! # Dispatch Tracker
//!
//! Live tracking for emergency calls. Follows a responder along the
//! remaining route to the patient and keeps distance and ETA current.
//!
//! ## Features
//! - Immediate local trimming of the traversed route prefix
//! - Debounced route recalculation through the shared provider client
//! - Distance and ETA estimates with a flat-speed fallback
//! - Call session binding backend changes and lifecycle writes
//! - Tracking events for every screen watching the call

pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod state;

pub use engine::{RouteTracker, UpdateOutcome};
pub use error::{SessionError, SessionResult};
pub use events::EventBus;
pub use session::CallSession;
pub use state::{TrackerPhase, TrackerSnapshot, TrackerState};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tracking thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Moves shorter than this are GPS jitter
    pub jitter_threshold_m: f64,
    /// Route points closer than this to the responder count as traversed
    pub trim_radius_m: f64,
    /// Distance from the last recalculation origin before a new route is worth asking for
    pub recalculation_distance_m: f64,
    pub min_recalculation_interval_secs: u64,
    pub debounce_secs: u64,
    /// Average speed for the fallback ETA
    pub fallback_speed_kmh: f64,
    /// Distance to the patient at which the responder counts as arrived
    pub arrival_radius_m: f64,
    /// Broadcast capacity of the event bus
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            jitter_threshold_m: 50.0,
            trim_radius_m: 100.0,
            recalculation_distance_m: 500.0,
            min_recalculation_interval_secs: 15,
            debounce_secs: 8,
            fallback_speed_kmh: 60.0,
            arrival_radius_m: 50.0,
            event_capacity: 1024,
        }
    }
}

impl TrackerConfig {
    pub fn min_recalculation_interval(&self) -> Duration {
        Duration::from_secs(self.min_recalculation_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = TrackerConfig::default();
        assert_eq!(config.jitter_threshold_m, 50.0);
        assert_eq!(config.trim_radius_m, 100.0);
        assert_eq!(config.recalculation_distance_m, 500.0);
        assert_eq!(config.min_recalculation_interval(), Duration::from_secs(15));
        assert_eq!(config.debounce(), Duration::from_secs(8));
        assert_eq!(config.fallback_speed_kmh, 60.0);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: TrackerConfig = serde_json::from_str(r#"{ "debounce_secs": 3 }"#).unwrap();
        assert_eq!(config.debounce(), Duration::from_secs(3));
        assert_eq!(config.trim_radius_m, 100.0);
    }
}
