//! # Dispatch Routing
//!
//! Client for the external driving-route provider.
//!
//! ## Features
//! - OSRM-compatible HTTP transport (`route` service, GeoJSON geometry)
//! - Process-wide route cache keyed at several coordinate precisions
//! - Global spacing between provider calls and 429 backoff
//! - Single-flight: at most one provider request outstanding

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use cache::{cache_key, RouteCache};
pub use client::{ProviderStats, RouteFetch, RouteProviderClient};
pub use config::RoutingConfig;
pub use error::{RoutingError, RoutingResult};
pub use transport::{OsrmTransport, ProviderReply, RouteTransport};
