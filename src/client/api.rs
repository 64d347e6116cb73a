//! Status API client.
//!
//! Used by the `status`, `start`, `stop` and `restart` subcommands to talk
//! to a running supervisor.

use crate::error::{KanshiError, Result};
use crate::server::response::{
    ApiResponse, HealthData, ServiceAction, ServiceOperationData, ServicesListData,
};
use crate::supervisor::ProcessSnapshot;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for HTTP requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP client for a supervisor's status API.
#[derive(Debug, Clone)]
pub struct SupervisorClient {
    /// HTTP client.
    client: Client,
    /// Base URL of the target supervisor.
    base_url: String,
}

impl SupervisorClient {
    /// Creates a new client for the specified supervisor URL.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the status API (e.g., "http://127.0.0.1:7070")
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a new client with custom timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KanshiError::internal_with_source("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Returns the base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks the health of the target supervisor.
    pub async fn health(&self) -> Result<HealthData> {
        let url = format!("{}/api/v1/health", self.base_url);
        debug!(url = %url, "Checking supervisor health");

        let response = self.send(self.client.get(&url)).await?;
        Self::decode(response, "health").await
    }

    /// Lists every configured service, optionally filtered by state name.
    pub async fn services(&self, state: Option<&str>) -> Result<ServicesListData> {
        let mut url = format!("{}/api/v1/services", self.base_url);
        if let Some(state) = state {
            url = format!("{}?state={}", url, state);
        }
        debug!(url = %url, "Listing services");

        let response = self.send(self.client.get(&url)).await?;
        Self::decode(response, "services list").await
    }

    /// Gets the snapshot of a single service.
    pub async fn service(&self, name: &str) -> Result<ProcessSnapshot> {
        let url = format!("{}/api/v1/services/{}", self.base_url, name);
        debug!(url = %url, service = %name, "Getting service details");

        let response = self.send(self.client.get(&url)).await?;
        Self::decode(response, "service detail").await
    }

    /// Asks the supervisor to start, stop or restart a service.
    ///
    /// The call returns once the supervisor has finished the operation.
    pub async fn action(&self, name: &str, action: ServiceAction) -> Result<ServiceOperationData> {
        let url = format!("{}/api/v1/services/{}/{}", self.base_url, name, action);
        info!(url = %url, service = %name, action = %action, "Sending service action");

        let response = self.send(self.client.post(&url)).await?;
        Self::decode(response, "service action").await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| KanshiError::connection_with_source(&self.base_url, e))
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let api_response: ApiResponse<T> = response.json().await.map_err(|e| {
            KanshiError::internal_with_source(format!("Failed to parse {} response", what), e)
        })?;

        if api_response.success {
            api_response
                .data
                .ok_or_else(|| KanshiError::internal(format!("{} response missing data", what)))
        } else {
            Err(Self::extract_error(api_response))
        }
    }

    /// Extracts an error from an API response.
    fn extract_error<T>(response: ApiResponse<T>) -> KanshiError {
        match response.error {
            Some(err) => KanshiError::Remote {
                code: err.code,
                message: err.message,
            },
            None => KanshiError::internal("Unknown error"),
        }
    }
}
