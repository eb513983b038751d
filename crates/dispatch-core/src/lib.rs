//! # Dispatch Core
//!
//! Core domain models and types for the emergency dispatch tracker.
//! This crate provides the call record model, geo utilities and the
//! tracking events shared across all crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod error;
pub mod events;
pub mod geo;
pub mod route;

pub use error::{CoreError, CoreResult};
pub use events::*;
pub use geo::*;
pub use route::*;

// ============================================================================
// CALL MODELS
// ============================================================================

/// Unique identifier for an emergency call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CallId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Lifecycle status of an emergency call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Raised by the patient, waiting for an operator
    Pending,
    /// An operator is triaging the call
    UnderReview,
    /// A responder is driving to the patient
    EnRoute,
    /// The responder reached the patient
    OnSite,
    /// Closed by an operator without completion
    Finalized,
    /// Attended and closed
    Completed,
    /// Withdrawn before a responder arrived
    Cancelled,
}

impl CallStatus {
    /// Statuses after which no further tracking happens
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Finalized | CallStatus::Completed | CallStatus::Cancelled
        )
    }

    /// Whether a responder is moving towards the patient
    pub fn is_tracking(&self) -> bool {
        *self == CallStatus::EnRoute
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::UnderReview => "under_review",
            CallStatus::EnRoute => "en_route",
            CallStatus::OnSite => "on_site",
            CallStatus::Finalized => "finalized",
            CallStatus::Completed => "completed",
            CallStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim() {
            "pending" => Ok(CallStatus::Pending),
            "under_review" => Ok(CallStatus::UnderReview),
            "en_route" => Ok(CallStatus::EnRoute),
            "on_site" => Ok(CallStatus::OnSite),
            "finalized" => Ok(CallStatus::Finalized),
            "completed" => Ok(CallStatus::Completed),
            "cancelled" => Ok(CallStatus::Cancelled),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

impl Default for CallStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// An emergency call row as stored by the hosted backend.
///
/// Positions are kept as the raw `"lat,lng"` text the backend stores; use
/// [`CallRecord::call_coordinate`] and [`CallRecord::responder_position`]
/// to read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub responder_id: Option<Uuid>,
    pub status: CallStatus,
    /// Patient location, fixed at creation
    #[serde(default)]
    pub call_location: Option<String>,
    /// Last reported responder position
    #[serde(default)]
    pub responder_initial_position: Option<String>,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    pub fn new(client_id: Uuid, call_location: Coordinate) -> Self {
        Self {
            id: CallId::new(),
            client_id: Some(client_id),
            responder_id: None,
            status: CallStatus::Pending,
            call_location: Some(call_location.to_string()),
            responder_initial_position: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Patient location, `None` when absent or malformed
    pub fn call_coordinate(&self) -> Option<Coordinate> {
        self.call_location.as_deref().and_then(|s| s.parse().ok())
    }

    /// Responder position, `None` when absent or malformed
    pub fn responder_position(&self) -> Option<Coordinate> {
        self.responder_initial_position
            .as_deref()
            .and_then(|s| s.parse().ok())
    }

    pub fn with_responder(mut self, responder_id: Uuid, position: Coordinate) -> Self {
        self.responder_id = Some(responder_id);
        self.responder_initial_position = Some(position.to_string());
        self
    }

    pub fn with_status(mut self, status: CallStatus) -> Self {
        self.status = status;
        self
    }
}

/// Body for creating a call
#[derive(Debug, Clone, Serialize)]
pub struct NewCall {
    pub client_id: Uuid,
    pub status: CallStatus,
    pub call_location: String,
    pub opened_at: DateTime<Utc>,
}

impl NewCall {
    pub fn new(client_id: Uuid, call_location: Coordinate) -> Self {
        Self {
            client_id,
            status: CallStatus::Pending,
            call_location: call_location.to_string(),
            opened_at: Utc::now(),
        }
    }
}

/// Partial update of a call; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CallStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder_initial_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl CallPatch {
    pub fn status(status: CallStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn responder_position(position: Coordinate) -> Self {
        Self {
            responder_initial_position: Some(position.to_string()),
            ..Default::default()
        }
    }

    pub fn closed_at(mut self, at: DateTime<Utc>) -> Self {
        self.closed_at = Some(at);
        self
    }
}

// ============================================================================
// CHANGE EVENTS
// ============================================================================

/// Kind of row change delivered by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change to a call row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    pub new: Option<CallRecord>,
    pub old: Option<CallRecord>,
}

impl ChangeEvent {
    pub fn insert(record: CallRecord) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            new: Some(record),
            old: None,
        }
    }

    pub fn update(old: Option<CallRecord>, new: CallRecord) -> Self {
        Self {
            event_type: ChangeKind::Update,
            new: Some(new),
            old,
        }
    }

    pub fn delete(old: CallRecord) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// Id of the affected call
    pub fn call_id(&self) -> Option<CallId> {
        self.new.as_ref().or(self.old.as_ref()).map(|r| r.id)
    }

    /// The row the filter should be checked against
    pub fn record(&self) -> Option<&CallRecord> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Row filter shared by queries and subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallFilter {
    pub call_id: Option<CallId>,
    pub client_id: Option<Uuid>,
    pub responder_id: Option<Uuid>,
    pub status: Option<CallStatus>,
}

impl CallFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn call(id: CallId) -> Self {
        Self {
            call_id: Some(id),
            ..Default::default()
        }
    }

    pub fn responder(responder_id: Uuid) -> Self {
        Self {
            responder_id: Some(responder_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: CallStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &CallRecord) -> bool {
        self.call_id.is_none_or(|id| record.id == id)
            && self.client_id.is_none_or(|id| record.client_id == Some(id))
            && self
                .responder_id
                .is_none_or(|id| record.responder_id == Some(id))
            && self.status.is_none_or(|s| record.status == s)
    }

    /// `column=eq.value` pairs for a REST query string
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(id) = self.call_id {
            pairs.push(("id".to_string(), format!("eq.{}", id)));
        }
        if let Some(id) = self.client_id {
            pairs.push(("client_id".to_string(), format!("eq.{}", id)));
        }
        if let Some(id) = self.responder_id {
            pairs.push(("responder_id".to_string(), format!("eq.{}", id)));
        }
        if let Some(status) = self.status {
            pairs.push(("status".to_string(), format!("eq.{}", status)));
        }
        pairs
    }
}

// ============================================================================
// ETA MODELS
// ============================================================================

/// Shown when no distance or ETA is available
pub const PLACEHOLDER: &str = "—";

/// Remaining distance and arrival estimates for display
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EtaEstimate {
    pub distance_remaining_km: Option<f64>,
    /// Minutes at the flat fallback speed
    pub eta_fallback_minutes: Option<f64>,
    /// Minutes from the provider's duration
    pub eta_provider_minutes: Option<f64>,
}

impl EtaEstimate {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Estimate from a remaining route length and the provider duration, if any
    pub fn from_route(
        distance_km: Option<f64>,
        duration_seconds: Option<f64>,
        speed_kmh: f64,
    ) -> Self {
        let eta_fallback_minutes = match distance_km {
            Some(km) if speed_kmh > 0.0 => Some(km / speed_kmh * 60.0),
            _ => None,
        };

        Self {
            distance_remaining_km: distance_km,
            eta_fallback_minutes,
            eta_provider_minutes: duration_seconds.map(|s| s / 60.0),
        }
    }

    /// Provider estimate when present, flat-speed estimate otherwise
    pub fn minutes(&self) -> Option<f64> {
        self.eta_provider_minutes.or(self.eta_fallback_minutes)
    }

    pub fn display_distance(&self) -> String {
        match self.distance_remaining_km {
            Some(km) if km < 1.0 => format!("{:.0} m", km * 1000.0),
            Some(km) => format!("{:.1} km", km),
            None => PLACEHOLDER.to_string(),
        }
    }

    pub fn display_eta(&self) -> String {
        match self.minutes() {
            Some(m) if m < 1.0 => "< 1 min".to_string(),
            Some(m) => format!("{:.0} min", m.round()),
            None => PLACEHOLDER.to_string(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
