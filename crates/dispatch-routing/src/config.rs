//! Routing provider configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Routing provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Provider base URL, without trailing slash
    pub base_url: String,
    /// Travel mode path segment
    pub profile: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Minimum spacing between provider calls in seconds
    pub min_call_interval_secs: u64,
    /// Wait after an HTTP 429 before reporting it, in seconds
    pub rate_limit_backoff_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://router.project-osrm.org".to_string(),
            profile: "driving".to_string(),
            request_timeout_secs: 10,
            min_call_interval_secs: 30,
            rate_limit_backoff_secs: 60,
        }
    }
}

impl RoutingConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = std::env::var("ROUTING_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);

        let profile = std::env::var("ROUTING_PROFILE").unwrap_or(defaults.profile);

        let min_call_interval_secs = std::env::var("ROUTING_MIN_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_call_interval_secs);

        Self {
            base_url,
            profile,
            min_call_interval_secs,
            ..defaults
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_secs(self.min_call_interval_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RoutingConfig::default();
        assert_eq!(config.min_call_interval(), Duration::from_secs(30));
        assert_eq!(config.rate_limit_backoff(), Duration::from_secs(60));
        assert_eq!(config.profile, "driving");
    }
}
