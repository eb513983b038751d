//! Route geometry returned by the routing provider

use crate::geo::{haversine_distance_meters, total_path_length_km, Coordinate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ordered route geometry from origin to destination.
///
/// The points are shared and never mutated; trimming produces a new,
/// shorter polyline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutePolyline(Arc<[Coordinate]>);

impl RoutePolyline {
    pub fn new(points: Vec<Coordinate>) -> Self {
        Self(points.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn origin(&self) -> Option<Coordinate> {
        self.0.first().copied()
    }

    pub fn destination(&self) -> Option<Coordinate> {
        self.0.last().copied()
    }

    /// Total length in kilometers
    pub fn length_km(&self) -> f64 {
        total_path_length_km(&self.0)
    }

    /// Polyline starting at `start`, or an identical clone when `start` is 0
    pub fn suffix(&self, start: usize) -> Self {
        if start == 0 {
            return self.clone();
        }
        let start = start.min(self.0.len());
        Self(self.0[start..].into())
    }

    /// Index the route should be cut at for a responder standing at `position`.
    ///
    /// Finds the first run of points within `radius_m` of the position and
    /// returns the index of the nearest point in that run. `None` when no
    /// point is within radius.
    pub fn traversed_prefix_len(&self, position: Coordinate, radius_m: f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;

        for (i, point) in self.0.iter().enumerate() {
            let d = haversine_distance_meters(*point, position);
            if d < radius_m {
                match best {
                    Some((_, best_d)) if best_d <= d => {}
                    _ => best = Some((i, d)),
                }
            } else if best.is_some() {
                break;
            }
        }

        best.map(|(i, _)| i)
    }
}

impl From<Vec<Coordinate>> for RoutePolyline {
    fn from(points: Vec<Coordinate>) -> Self {
        Self::new(points)
    }
}

/// A route as returned by the provider
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouteResult {
    pub coords: RoutePolyline,
    /// Provider travel time estimate
    pub duration_seconds: Option<f64>,
}

impl RouteResult {
    pub fn new(coords: impl Into<RoutePolyline>, duration_seconds: Option<f64>) -> Self {
        Self {
            coords: coords.into(),
            duration_seconds,
        }
    }

    /// The "try again later" result
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> RoutePolyline {
        // ~111 m between consecutive points along a meridian
        RoutePolyline::new((0..10).map(|i| Coordinate::new(i as f64 * 0.001, 0.0)).collect())
    }

    #[test]
    fn test_suffix_shares_tail() {
        let route = line();
        let tail = route.suffix(4);
        assert_eq!(tail.len(), 6);
        assert_eq!(tail.origin(), route.points().get(4).copied());
        assert_eq!(tail.destination(), route.destination());
        assert!(route.suffix(50).is_empty());
    }

    #[test]
    fn test_traversed_prefix_picks_nearest_in_first_run() {
        let route = line();
        let position = Coordinate::new(0.00305, 0.0);

        assert_eq!(route.traversed_prefix_len(position, 100.0), Some(3));
    }

    #[test]
    fn test_traversed_prefix_none_when_far_away() {
        let route = line();
        assert_eq!(route.traversed_prefix_len(Coordinate::new(1.0, 1.0), 100.0), None);
    }

    #[test]
    fn test_empty_result() {
        let result = RouteResult::empty();
        assert!(result.is_empty());
        assert!(result.duration_seconds.is_none());
        assert_eq!(result.coords.length_km(), 0.0);
    }
}
