//! HTTP client for the cluster's scheduler API

use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::DeployError;

/// HTTP client bound to one base URL
pub struct HttpClient {
    client: Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, DeployError> {
        // Url::join drops the last segment unless the base ends with '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| DeployError::ConfigError(format!("Invalid URL '{}': {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Resolve a path relative to the base URL
    pub fn url(&self, path: &str) -> Result<Url, DeployError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| DeployError::ConfigError(format!("Invalid path '{}': {}", path, e)))
    }

    /// Make a PUT request with a JSON body
    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DeployError> {
        let url = self.url(path)?;
        debug!("PUT {}", url);

        let response = self.client.put(url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP PUT failed: {} - {}", status, body);
            return Err(DeployError::LaunchError(format!("{}: {}", status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }

    /// GET a path and return the body as text
    pub async fn get_text(&self, path: &str) -> Result<String, DeployError> {
        let url = self.url(path)?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(DeployError::Internal(format!("{}: {}", status, body)));
        }

        Ok(response.text().await?)
    }
}
