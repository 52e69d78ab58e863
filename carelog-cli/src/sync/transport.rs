//! HTTP transport to the sync server.

use async_trait::async_trait;
use carelog_core::{
    checkpoint_string, PullResponse, PushRequest, PushResponse, StatusResponse, SyncError,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::SyncConfig;

/// Timeout for the reachability check.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// The network side of sync. Every call is bounded by a timeout; a timeout
/// surfaces as [`SyncError::Timeout`].
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, SyncError>;

    /// One page of changes after `last_sync`. Events submitted by
    /// `exclude_client` are left out; `None` returns every device's events.
    async fn pull(
        &self,
        last_sync: Option<DateTime<Utc>>,
        exclude_client: Option<&str>,
    ) -> Result<PullResponse, SyncError>;

    async fn status(
        &self,
        last_sync: Option<DateTime<Utc>>,
        client_id: &str,
    ) -> Result<StatusResponse, SyncError>;
}

/// Transport over the server's JSON endpoints.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        server_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Creates a transport from config.
    ///
    /// Returns an error if sync is not configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let server_url = config
            .server_url
            .as_deref()
            .ok_or(SyncError::NotConfigured)?;
        let api_key = config.api_key.clone().ok_or(SyncError::NotConfigured)?;

        Self::new(server_url, api_key, Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn checkpoint_query(
        last_sync: Option<DateTime<Utc>>,
        client_id: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(client_id) = client_id {
            query.push(("client_id", client_id.to_string()));
        }
        if let Some(checkpoint) = last_sync {
            query.push(("last_sync", checkpoint_string(&checkpoint)));
        }
        query
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, SyncError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body["message"]
                .as_str()
                .or_else(|| body["error"].as_str())
                .unwrap_or("Unknown error")
                .to_string();
            return Err(SyncError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::ConnectionError(e.to_string())
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, SyncError> {
        self.send(self.client.post(self.url("/sync/push")).json(request))
            .await
    }

    async fn pull(
        &self,
        last_sync: Option<DateTime<Utc>>,
        exclude_client: Option<&str>,
    ) -> Result<PullResponse, SyncError> {
        let query = Self::checkpoint_query(last_sync, exclude_client);
        self.send(self.client.get(self.url("/sync/pull")).query(&query))
            .await
    }

    async fn status(
        &self,
        last_sync: Option<DateTime<Utc>>,
        client_id: &str,
    ) -> Result<StatusResponse, SyncError> {
        let query = Self::checkpoint_query(last_sync, Some(client_id));
        self.send(self.client.get(self.url("/sync/status")).query(&query))
            .await
    }
}

/// Checks whether the server answers its health endpoint.
pub async fn check_server(server_url: &str) -> bool {
    let url = format!("{}/health", server_url.trim_end_matches('/'));
    let client = match reqwest::Client::builder().timeout(HEALTH_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}
