//! The reqwest-backed Turf API client.
//!
//! Endpoint shapes (v5): `GET /feeds/takeover+medal?afterDate=...`,
//! `POST /users` with `[{"name": ...}]`, `GET /users/location`, and
//! `POST /zones` with one bounding box. Non-2xx responses are
//! failures; 429 maps to [`UpstreamError::RateLimited`].

use crate::traits::{BoundingBox, UpstreamApi, UpstreamError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use turfcast_core::{LocationRecord, RequestQueue, UserRecord};

/// Turf API client; all calls go through the shared request queue.
#[derive(Debug, Clone)]
pub struct TurfClient {
    http: reqwest::Client,
    base_url: String,
    queue: RequestQueue,
}

impl TurfClient {
    /// Create a client against `base_url` (no trailing slash).
    #[must_use]
    pub fn new(base_url: impl Into<String>, queue: RequestQueue) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            queue,
        }
    }

    /// Enqueue a prepared request and decode its JSON response.
    async fn execute<T>(&self, request: reqwest::RequestBuilder) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.queue.enqueue(move || send(request)).await?
    }
}

/// Perform one upstream call. Runs inside the queue's drain task.
async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, UpstreamError> {
    let response = request
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(UpstreamError::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status { status, body });
    }

    Ok(response.json().await?)
}

#[async_trait]
impl UpstreamApi for TurfClient {
    async fn feed_since(&self, after: Option<&str>) -> Result<Vec<Value>, UpstreamError> {
        let url = format!("{}/feeds/takeover+medal", self.base_url);
        debug!(url = %url, after = after.unwrap_or("<none>"), "Fetching feed");

        let mut request = self.http.get(&url);
        if let Some(cursor) = after {
            // The cursor is the upstream's own time string; query
            // encoding keeps its '+' timezone marker intact.
            request = request.query(&[("afterDate", cursor)]);
        }
        self.execute(request).await
    }

    async fn lookup_user(&self, name: &str) -> Result<Vec<UserRecord>, UpstreamError> {
        let url = format!("{}/users", self.base_url);
        debug!(url = %url, user = name, "Looking up user");

        let request = self.http.post(&url).json(&json!([{ "name": name }]));
        self.execute(request).await
    }

    async fn locations(&self) -> Result<Vec<LocationRecord>, UpstreamError> {
        let url = format!("{}/users/location", self.base_url);
        debug!(url = %url, "Fetching locations");

        self.execute(self.http.get(&url)).await
    }

    async fn zones_within(&self, bbox: BoundingBox) -> Result<Value, UpstreamError> {
        let url = format!("{}/zones", self.base_url);
        debug!(url = %url, "Fetching zones");

        let request = self.http.post(&url).json(&json!([bbox]));
        self.execute(request).await
    }
}
