//! # Dispatch Backend
//!
//! Integration with the hosted backend that owns call records and
//! authentication, plus the device storage used to keep the session
//! token and active call id between runs.

pub mod config;
pub mod error;
pub mod repository;
pub mod storage;

pub use config::BackendConfig;
pub use error::{BackendError, BackendResult};
pub use repository::{CallRepository, RestCallRepository};
pub use storage::{
    load_access_token, FileStore, KeyValueStore, MemoryStore, ACCESS_TOKEN_KEY, ACTIVE_CALL_KEY,
};

use tracing::info;

/// Build a REST repository authenticated with the token kept in `store`.
///
/// Missing configuration or token is reported before any request is made.
pub fn connect(
    config: BackendConfig,
    store: &dyn KeyValueStore,
) -> BackendResult<RestCallRepository> {
    let token = load_access_token(store)?;
    let repository = RestCallRepository::new(config)?.with_access_token(token);
    info!("Backend repository ready");
    Ok(repository)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_requires_token() {
        let store = MemoryStore::new();
        let config = BackendConfig::new("https://demo.example.co", "anon");
        assert!(matches!(connect(config.clone(), &store), Err(BackendError::Unauthorized(_))));

        store.set(ACCESS_TOKEN_KEY, "jwt").unwrap();
        let repo = connect(config, &store).unwrap();
        assert!(repo.has_access_token());
    }

    #[test]
    fn test_connect_requires_config() {
        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "jwt").unwrap();
        let err = connect(BackendConfig::default(), &store).unwrap_err();
        assert!(err.requires_reauthentication());
    }
}
