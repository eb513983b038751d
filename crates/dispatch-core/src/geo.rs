//! Geographic types and distance calculations for call tracking

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Earth's radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Meters per degree of latitude used by the flat approximation
const METERS_PER_DEGREE: f64 = 111_000.0;

/// Geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build from a provider `[lng, lat]` pair
    pub fn from_lng_lat(pair: [f64; 2]) -> Self {
        Self::new(pair[1], pair[0])
    }

    /// Check if this coordinate is within valid ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to another coordinate in meters
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        haversine_distance_meters(*self, *other)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// Parses the `"lat,lng"` text the backend stores for positions.
/// Surrounding whitespace and a wrapping pair of parentheses are tolerated.
impl FromStr for Coordinate {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);

        let mut parts = inner.split(',');
        let (Some(lat), Some(lng), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CoreError::malformed_position(s));
        };

        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| CoreError::malformed_position(s))?;
        let lng: f64 = lng
            .trim()
            .parse()
            .map_err(|_| CoreError::malformed_position(s))?;

        let coordinate = Coordinate::new(lat, lng);
        if !coordinate.is_valid() {
            return Err(CoreError::invalid_position(lat, lng));
        }
        Ok(coordinate)
    }
}

/// Great-circle distance between two coordinates using the Haversine formula.
/// Returns meters.
pub fn haversine_distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lng = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_KM * c * 1000.0
}

/// Equirectangular approximation in meters.
///
/// Only good for "did we move enough to care" checks under ~1 km.
pub fn flat_distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let mean_lat = ((a.latitude + b.latitude) / 2.0).to_radians();
    let dy = (b.latitude - a.latitude) * METERS_PER_DEGREE;
    let dx = (b.longitude - a.longitude) * METERS_PER_DEGREE * mean_lat.cos();
    (dx * dx + dy * dy).sqrt()
}

/// Sum of Haversine distances between consecutive points, in kilometers.
/// Returns 0 for fewer than two points.
pub fn total_path_length_km(points: &[Coordinate]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance_meters(w[0], w[1]) / 1000.0)
        .sum()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_degree_of_longitude_at_equator() {
        let d = haversine_distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 1_112.0, "got {}", d);
    }

    #[test]
    fn test_same_point_is_zero() {
        let p = Coordinate::new(-25.4284, -49.2733);
        assert!(haversine_distance_meters(p, p) < 1e-6);
        assert_eq!(total_path_length_km(&[p]), 0.0);
        assert_eq!(total_path_length_km(&[]), 0.0);
    }

    #[test]
    fn test_path_length_is_sum_of_legs() {
        let a = Coordinate::new(-25.4284, -49.2733);
        let b = Coordinate::new(-25.4300, -49.2750);
        let c = Coordinate::new(-25.4400, -49.2800);

        let expected = (haversine_distance_meters(a, b) + haversine_distance_meters(b, c)) / 1000.0;
        let total = total_path_length_km(&[a, b, c]);
        assert!((total - expected).abs() <= expected * 0.001);
    }

    #[test]
    fn test_curitiba_short_hop() {
        let origin = Coordinate::new(-25.4284, -49.2733);
        let destination = Coordinate::new(-25.4300, -49.2750);

        let km = total_path_length_km(&[origin, destination]);
        assert!(km > 0.207 && km < 0.253, "got {} km", km);
    }

    #[test]
    fn test_flat_approximation_close_to_haversine_for_short_distances() {
        let a = Coordinate::new(-25.4284, -49.2733);
        let b = Coordinate::new(-25.4310, -49.2760);

        let exact = haversine_distance_meters(a, b);
        let flat = flat_distance_meters(a, b);
        assert!((exact - flat).abs() / exact < 0.01);
    }

    #[test]
    fn test_parse_position_text() {
        let c: Coordinate = " -25.4284, -49.2733 ".parse().unwrap();
        assert_eq!(c, Coordinate::new(-25.4284, -49.2733));

        let c: Coordinate = "(-25.5,-49.1)".parse().unwrap();
        assert_eq!(c, Coordinate::new(-25.5, -49.1));
    }

    #[test]
    fn test_parse_rejects_malformed_positions() {
        assert!("".parse::<Coordinate>().is_err());
        assert!("-25.4".parse::<Coordinate>().is_err());
        assert!("abc,def".parse::<Coordinate>().is_err());
        assert!("1,2,3".parse::<Coordinate>().is_err());
        assert!(matches!(
            "95.0,10.0".parse::<Coordinate>(),
            Err(CoreError::InvalidPosition { .. })
        ));
    }

    #[test]
    fn test_from_lng_lat_swaps_order() {
        let c = Coordinate::from_lng_lat([-49.27, -25.42]);
        assert_eq!(c.latitude, -25.42);
        assert_eq!(c.longitude, -49.27);
    }
}
