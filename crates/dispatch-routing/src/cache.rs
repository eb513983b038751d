//! Process-wide route cache keyed by rounded coordinate pairs

use dashmap::DashMap;
use dispatch_core::{Coordinate, RouteResult};
use tracing::debug;

/// Decimal places used for keys, in lookup order.
/// 3 decimals is ~100 m; 4 and 2 are stored alongside to raise the hit rate.
pub const KEY_PRECISIONS: [usize; 3] = [3, 4, 2];

/// Cache key for an origin/destination pair at the given precision
pub fn cache_key(origin: Coordinate, destination: Coordinate, precision: usize) -> String {
    format!(
        "{:.p$},{:.p$}-{:.p$},{:.p$}",
        origin.latitude,
        origin.longitude,
        destination.latitude,
        destination.longitude,
        p = precision
    )
}

/// Shared store of previously fetched routes.
///
/// Entries are never evicted; the same result is stored under every
/// precision variant of its key.
#[derive(Debug, Default)]
pub struct RouteCache {
    entries: DashMap<String, RouteResult>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, origin: Coordinate, destination: Coordinate) -> Option<RouteResult> {
        KEY_PRECISIONS.iter().find_map(|&precision| {
            let key = cache_key(origin, destination, precision);
            let hit = self.entries.get(&key).map(|entry| entry.value().clone());
            if hit.is_some() {
                debug!(%key, "Route cache hit");
            }
            hit
        })
    }

    pub fn put(&self, origin: Coordinate, destination: Coordinate, result: RouteResult) {
        for precision in KEY_PRECISIONS {
            self.entries
                .insert(cache_key(origin, destination, precision), result.clone());
        }
    }

    /// Number of stored keys (three per route)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
