//! Console configuration
//!
//! Layered, later sources winning:
//! 1. built-in defaults and the legacy `DISPATCH_*`/`ROUTING_*` variables
//! 2. `config/dispatch.toml`, when present
//! 3. `DISPATCH__SECTION__KEY` environment variables

use dispatch_backend::BackendConfig;
use dispatch_routing::RoutingConfig;
use dispatch_tracker::TrackerConfig;

use config::{Config, Environment, File, Source};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConsoleResult;

const DEFAULT_CONFIG_FILE: &str = "config/dispatch";

/// Where call changes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// Backend websocket channel
    #[default]
    Realtime,
    /// Periodic queries
    Poll,
}

/// Console configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub backend: BackendConfig,
    pub routing: RoutingConfig,
    pub tracker: TrackerConfig,
    /// JSON file holding the access token and active call id
    pub storage_path: PathBuf,
    pub feed: FeedMode,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            routing: RoutingConfig::default(),
            tracker: TrackerConfig::default(),
            storage_path: PathBuf::from(".dispatch/storage.json"),
            feed: FeedMode::default(),
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from the environment only
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let storage_path = std::env::var("DISPATCH_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default().storage_path);

        let feed = match std::env::var("DISPATCH_FEED").as_deref() {
            Ok("poll") => FeedMode::Poll,
            _ => FeedMode::Realtime,
        };

        Self {
            backend: BackendConfig::from_env(),
            routing: RoutingConfig::from_env(),
            tracker: TrackerConfig::default(),
            storage_path,
            feed,
        }
    }

    /// Full layered load
    pub fn load() -> ConsoleResult<Self> {
        Self::layered(
            Self::from_env(),
            File::with_name(DEFAULT_CONFIG_FILE).required(false),
        )
    }

    fn layered<S>(base: Self, file: S) -> ConsoleResult<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .add_source(Config::try_from(&base)?)
            .add_source(file)
            .add_source(
                Environment::with_prefix("DISPATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
