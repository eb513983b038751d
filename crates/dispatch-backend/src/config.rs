//! Hosted backend configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BackendError, BackendResult};

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://xyz.example.co`
    pub url: String,
    /// Public API key sent as the `apikey` header
    pub api_key: String,
    /// Table holding call records
    pub calls_table: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Interval for the polling change feed in seconds
    pub poll_interval_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            calls_table: "calls".to_string(),
            request_timeout_secs: 10,
            poll_interval_secs: 5,
        }
    }
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let url = std::env::var("DISPATCH_BACKEND_URL").unwrap_or_default();
        let api_key = std::env::var("DISPATCH_BACKEND_KEY").unwrap_or_default();

        let calls_table = std::env::var("DISPATCH_CALLS_TABLE")
            .unwrap_or_else(|_| "calls".to_string());

        let poll_interval_secs = std::env::var("DISPATCH_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Self {
            url,
            api_key,
            calls_table,
            poll_interval_secs,
            ..Default::default()
        }
    }

    /// Fails when the URL or key is missing
    pub fn validate(&self) -> BackendResult<()> {
        if self.url.trim().is_empty() {
            return Err(BackendError::configuration("backend URL is not set"));
        }
        if self.api_key.trim().is_empty() {
            return Err(BackendError::configuration("backend API key is not set"));
        }
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// REST endpoint of the calls table
    pub fn calls_endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url(), self.calls_table)
    }

    /// Websocket endpoint of the realtime service
    pub fn realtime_endpoint(&self) -> String {
        let base = self.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base, self.api_key
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values_fail_validation() {
        assert!(matches!(
            BackendConfig::default().validate(),
            Err(BackendError::Configuration(_))
        ));
        assert!(BackendConfig::new("https://demo.example.co", "").validate().is_err());
        assert!(BackendConfig::new("https://demo.example.co", "anon").validate().is_ok());
    }

    #[test]
    fn test_endpoints() {
        let config = BackendConfig::new("https://demo.example.co/", "anon");
        assert_eq!(config.calls_endpoint(), "https://demo.example.co/rest/v1/calls");
        assert_eq!(
            config.realtime_endpoint(),
            "wss://demo.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }
}
