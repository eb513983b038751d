//! Call records over the backend's REST interface

use async_trait::async_trait;
use dispatch_core::{CallFilter, CallId, CallPatch, CallRecord, NewCall};
use parking_lot::RwLock;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};

/// CRUD access to call records
#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn fetch_call(&self, id: CallId) -> BackendResult<CallRecord>;

    async fn list_calls(&self, filter: &CallFilter) -> BackendResult<Vec<CallRecord>>;

    async fn create_call(&self, call: NewCall) -> BackendResult<CallRecord>;

    /// Apply a partial update and return the stored row
    async fn update_call(&self, id: CallId, patch: CallPatch) -> BackendResult<CallRecord>;
}

/// REST implementation against `{url}/rest/v1/{table}`
#[derive(Debug)]
pub struct RestCallRepository {
    config: BackendConfig,
    client: reqwest::Client,
    access_token: RwLock<Option<String>>,
}

impl RestCallRepository {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            config,
            client,
            access_token: RwLock::new(None),
        })
    }

    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        self.set_access_token(token);
        self
    }

    /// Token obtained by the login flow
    pub fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write() = Some(token.into());
    }

    pub fn clear_access_token(&self) {
        *self.access_token.write() = None;
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token.read().is_some()
    }

    /// Attach `apikey` and bearer headers; fails before any I/O without a token
    fn authorize(&self, request: RequestBuilder) -> BackendResult<RequestBuilder> {
        let token = self
            .access_token
            .read()
            .clone()
            .ok_or_else(|| BackendError::unauthorized("no access token, sign in again"))?;

        Ok(request
            .header("apikey", &self.config.api_key)
            .bearer_auth(token))
    }

    async fn read_rows(response: Response) -> BackendResult<Vec<CallRecord>> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }
        Ok(response.json::<Vec<CallRecord>>().await?)
    }
}

/// Map a non-success status to an error
fn status_error(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(message),
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        _ => BackendError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

fn first_row(rows: Vec<CallRecord>, id: impl std::fmt::Display) -> BackendResult<CallRecord> {
    rows.into_iter()
        .next()
        .ok_or_else(|| BackendError::not_found(format!("call {}", id)))
}

#[async_trait]
impl CallRepository for RestCallRepository {
    async fn fetch_call(&self, id: CallId) -> BackendResult<CallRecord> {
        let request = self
            .client
            .get(self.config.calls_endpoint())
            .query(&CallFilter::call(id).query_pairs())
            .query(&[("select", "*")]);

        let response = self.authorize(request)?.send().await?;
        first_row(Self::read_rows(response).await?, id)
    }

    async fn list_calls(&self, filter: &CallFilter) -> BackendResult<Vec<CallRecord>> {
        let request = self
            .client
            .get(self.config.calls_endpoint())
            .query(&filter.query_pairs())
            .query(&[("select", "*"), ("order", "opened_at.desc")]);

        let response = self.authorize(request)?.send().await?;
        let rows = Self::read_rows(response).await?;
        debug!(count = rows.len(), "Listed calls");
        Ok(rows)
    }

    async fn create_call(&self, call: NewCall) -> BackendResult<CallRecord> {
        let request = self
            .client
            .post(self.config.calls_endpoint())
            .header("Prefer", "return=representation")
            .json(&call);

        let response = self.authorize(request)?.send().await?;
        let created = first_row(Self::read_rows(response).await?, "created")?;
        info!(call_id = %created.id, "Call created");
        Ok(created)
    }

    async fn update_call(&self, id: CallId, patch: CallPatch) -> BackendResult<CallRecord> {
        let request = self
            .client
            .patch(self.config.calls_endpoint())
            .query(&CallFilter::call(id).query_pairs())
            .header("Prefer", "return=representation")
            .json(&patch);

        let response = self.authorize(request)?.send().await?;
        let updated = first_row(Self::read_rows(response).await?, id)?;
        debug!(call_id = %id, status = %updated.status, "Call updated");
        Ok(updated)
    }
}
