//! HTTP adapter for the routing provider.

use async_trait::async_trait;
use dispatch_core::{Coordinate, RouteResult};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::config::RoutingConfig;
use crate::error::{RoutingError, RoutingResult};

/// What the provider said about one route request
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    Route(RouteResult),
    /// Provider answered but had no route between the points
    NoRoute,
    /// HTTP 429
    RateLimited,
}

/// A single request/response exchange with the routing provider.
///
/// Rate limiting, caching and single-flight live in
/// [`RouteProviderClient`](crate::RouteProviderClient), not here.
#[async_trait]
pub trait RouteTransport: Send + Sync {
    async fn request_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> RoutingResult<ProviderReply>;
}

/// OSRM-compatible `route` service over HTTP
#[derive(Debug, Clone)]
pub struct OsrmTransport {
    config: RoutingConfig,
    client: reqwest::Client,
}

impl OsrmTransport {
    pub fn new(config: RoutingConfig) -> RoutingResult<Self> {
        if config.base_url.is_empty() {
            return Err(RoutingError::Configuration(
                "routing base URL is empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { config, client })
    }

    pub fn route_url(&self, origin: Coordinate, destination: Coordinate) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson",
            self.config.base_url,
            self.config.profile,
            origin.longitude,
            origin.latitude,
            destination.longitude,
            destination.latitude
        )
    }
}

#[async_trait]
impl RouteTransport for OsrmTransport {
    async fn request_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> RoutingResult<ProviderReply> {
        let url = self.route_url(origin, destination);
        debug!(%url, "Requesting route");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(ProviderReply::RateLimited);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RoutingError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<OsrmRouteResponse>().await?;
        Ok(body.into_reply())
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

impl OsrmRouteResponse {
    fn into_reply(self) -> ProviderReply {
        let Some(route) = self.routes.into_iter().next() else {
            return ProviderReply::NoRoute;
        };

        let coords: Vec<Coordinate> = route
            .geometry
            .coordinates
            .into_iter()
            .map(Coordinate::from_lng_lat)
            .collect();

        if coords.is_empty() {
            return ProviderReply::NoRoute;
        }

        ProviderReply::Route(RouteResult::new(coords, route.duration))
    }
}
