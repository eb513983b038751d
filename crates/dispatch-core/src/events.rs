//! Tracking events for a live call
//!
//! Published by the route tracker and the call session so that every
//! screen watching the same call sees the same updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CallId, CallStatus, Coordinate, EtaEstimate};

/// Event envelope for all tracking events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub call_id: CallId,
    pub event_type: EventType,
    pub payload: EventPayload,
}

impl TrackingEvent {
    pub fn new(call_id: CallId, event_type: EventType, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            call_id,
            event_type,
            payload,
        }
    }

    pub fn position_updated(call_id: CallId, position: Coordinate) -> Self {
        Self::new(
            call_id,
            EventType::PositionUpdated,
            EventPayload::Position(PositionEvent { position }),
        )
    }

    pub fn route_trimmed(call_id: CallId, removed_points: usize, remaining_points: usize) -> Self {
        Self::new(
            call_id,
            EventType::RouteTrimmed,
            EventPayload::Route(RouteEvent {
                removed_points,
                remaining_points,
                duration_seconds: None,
            }),
        )
    }

    pub fn route_recalculated(
        call_id: CallId,
        remaining_points: usize,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self::new(
            call_id,
            EventType::RouteRecalculated,
            EventPayload::Route(RouteEvent {
                removed_points: 0,
                remaining_points,
                duration_seconds,
            }),
        )
    }

    pub fn eta_updated(call_id: CallId, eta: EtaEstimate) -> Self {
        Self::new(call_id, EventType::EtaUpdated, EventPayload::Eta(eta))
    }

    pub fn responder_arrived(call_id: CallId, position: Coordinate, distance_m: f64) -> Self {
        Self::new(
            call_id,
            EventType::ResponderArrived,
            EventPayload::Arrival(ArrivalEvent {
                position,
                distance_m,
            }),
        )
    }

    pub fn status_changed(call_id: CallId, old_status: CallStatus, new_status: CallStatus) -> Self {
        Self::new(
            call_id,
            EventType::StatusChanged,
            EventPayload::Status(StatusEvent {
                old_status,
                new_status,
            }),
        )
    }

    pub fn session_closed(call_id: CallId, final_status: Option<CallStatus>) -> Self {
        Self::new(
            call_id,
            EventType::SessionClosed,
            EventPayload::Closed(ClosedEvent { final_status }),
        )
    }
}

/// Type of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PositionUpdated,
    RouteTrimmed,
    RouteRecalculated,
    EtaUpdated,
    ResponderArrived,
    StatusChanged,
    SessionClosed,
}

/// Event payload variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    Position(PositionEvent),
    Route(RouteEvent),
    Eta(EtaEstimate),
    Arrival(ArrivalEvent),
    Status(StatusEvent),
    Closed(ClosedEvent),
}

/// Responder moved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    pub position: Coordinate,
}

/// Remaining route changed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEvent {
    pub removed_points: usize,
    pub remaining_points: usize,
    pub duration_seconds: Option<f64>,
}

/// Responder came within arrival distance of the patient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrivalEvent {
    pub position: Coordinate,
    pub distance_m: f64,
}

/// Call status change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub old_status: CallStatus,
    pub new_status: CallStatus,
}

/// Session torn down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedEvent {
    pub final_status: Option<CallStatus>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event =
            TrackingEvent::status_changed(CallId::new(), CallStatus::EnRoute, CallStatus::OnSite);
        assert_eq!(event.event_type, EventType::StatusChanged);
    }

    #[test]
    fn test_event_serialization() {
        let call_id = CallId::new();
        let event =
            TrackingEvent::eta_updated(call_id, EtaEstimate::from_route(Some(2.0), None, 60.0));

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: TrackingEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.event_type, EventType::EtaUpdated);
        assert_eq!(deserialized.call_id, call_id);
        assert!(json.contains("ETA_UPDATED"));
    }
}
