//! Route provider client: cache lookup, call spacing and single-flight.

use dispatch_core::{Coordinate, RouteResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::RouteCache;
use crate::config::RoutingConfig;
use crate::error::{RoutingError, RoutingResult};
use crate::transport::{OsrmTransport, ProviderReply, RouteTransport};

/// Outcome of a route request
#[derive(Debug, Clone, PartialEq)]
pub enum RouteFetch {
    /// A route, from the cache or the provider
    Route(RouteResult),
    /// Another request was in flight; nothing was sent
    Busy,
    /// The provider failed or had no route
    Unavailable,
}

impl RouteFetch {
    /// Collapse into the plain result callers display; empty means "try later"
    pub fn into_result(self) -> RouteResult {
        match self {
            RouteFetch::Route(route) => route,
            RouteFetch::Busy | RouteFetch::Unavailable => RouteResult::empty(),
        }
    }
}

/// Client statistics
#[derive(Debug, Default, Clone)]
pub struct ProviderStats {
    pub requests_sent: u64,
    pub cache_hits: u64,
    pub rejected_in_flight: u64,
    pub rate_limited: u64,
    pub failures: u64,
}

/// Clears the in-flight flag when the request ends, however it ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared client for the routing provider.
///
/// One instance per process, shared by every tracker. At most one provider
/// request is outstanding at a time across all callers, and consecutive
/// requests are spaced by `min_call_interval`.
pub struct RouteProviderClient {
    config: RoutingConfig,
    transport: Arc<dyn RouteTransport>,
    cache: Arc<RouteCache>,
    in_flight: AtomicBool,
    last_call: Mutex<Option<Instant>>,
    stats: RwLock<ProviderStats>,
}

impl RouteProviderClient {
    pub fn new(
        config: RoutingConfig,
        transport: Arc<dyn RouteTransport>,
        cache: Arc<RouteCache>,
    ) -> Self {
        Self {
            config,
            transport,
            cache,
            in_flight: AtomicBool::new(false),
            last_call: Mutex::new(None),
            stats: RwLock::new(ProviderStats::default()),
        }
    }

    /// Client talking to an OSRM-compatible provider with a fresh cache
    pub fn osrm(config: RoutingConfig) -> RoutingResult<Self> {
        let transport = OsrmTransport::new(config.clone())?;
        info!(
            base_url = %config.base_url,
            profile = %config.profile,
            "Routing provider configured"
        );
        Ok(Self::new(config, Arc::new(transport), Arc::new(RouteCache::new())))
    }

    pub fn cache(&self) -> &Arc<RouteCache> {
        &self.cache
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ProviderStats {
        self.stats.read().clone()
    }

    /// Fetch a route, returning an empty result when nothing is available.
    ///
    /// Only a provider rate-limit is reported as an error, after waiting
    /// `rate_limit_backoff`.
    pub async fn fetch_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> RoutingResult<RouteResult> {
        self.try_fetch_route(origin, destination)
            .await
            .map(RouteFetch::into_result)
    }

    /// Like [`fetch_route`](Self::fetch_route) but tells busy apart from unavailable
    pub async fn try_fetch_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> RoutingResult<RouteFetch> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            self.stats.write().rejected_in_flight += 1;
            debug!("Route request already in flight, skipping");
            return Ok(RouteFetch::Busy);
        };

        if let Some(cached) = self.cache.get(origin, destination) {
            self.stats.write().cache_hits += 1;
            return Ok(RouteFetch::Route(cached));
        }

        self.wait_for_slot().await;
        *self.last_call.lock() = Some(Instant::now());
        self.stats.write().requests_sent += 1;

        match self.transport.request_route(origin, destination).await {
            Ok(ProviderReply::Route(route)) => {
                debug!(
                    points = route.coords.len(),
                    duration_seconds = ?route.duration_seconds,
                    "Route received"
                );
                self.cache.put(origin, destination, route.clone());
                Ok(RouteFetch::Route(route))
            }
            Ok(ProviderReply::NoRoute) => {
                self.stats.write().failures += 1;
                warn!(%origin, %destination, "Routing provider returned no route");
                Ok(RouteFetch::Unavailable)
            }
            Ok(ProviderReply::RateLimited) => {
                self.stats.write().rate_limited += 1;
                let backoff = self.config.rate_limit_backoff();
                warn!("Routing provider rate limited, backing off {:?}", backoff);
                tokio::time::sleep(backoff).await;
                Err(RoutingError::RateLimited { waited: backoff })
            }
            Err(e) => {
                self.stats.write().failures += 1;
                warn!(error = %e, "Route request failed");
                Ok(RouteFetch::Unavailable)
            }
        }
    }

    /// Sleep until `min_call_interval` has passed since the previous provider call
    async fn wait_for_slot(&self) {
        let wait = {
            let last = self.last_call.lock();
            last.map(|at| self.config.min_call_interval().saturating_sub(at.elapsed()))
                .unwrap_or(Duration::ZERO)
        };

        if !wait.is_zero() {
            debug!("Waiting {:?} before next route request", wait);
            tokio::time::sleep(wait).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
