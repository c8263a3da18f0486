//! Shared HTTP client for the Labtasker coordinator.
//!
//! A minimal client with HTTP Basic auth (queue name or id as the
//! username), generic request helpers, and domain methods covering the
//! whole API surface. The CLI and the job-loop runtime both use this
//! client directly.

pub mod api;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client bound to one queue's credentials.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn handle<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "API request failed with status {}: {}",
                status,
                error_text
            ));
        }
        response
            .json()
            .await
            .context("Failed to parse response as JSON")
    }

    /// GET with query parameters, deserializing the JSON response.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut request = self.client.get(self.build_url(path));
        request = self.apply_auth(request);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await.context("Failed to send request")?;
        Self::handle(response).await
    }

    /// POST a JSON body, deserializing the JSON response.
    pub async fn post_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.client.post(self.build_url(path)).json(body);
        let request = self.apply_auth(request);
        let response = request.send().await.context("Failed to send request")?;
        Self::handle(response).await
    }

    /// POST without a body; response body (if any) is discarded.
    pub async fn post_empty(&self, path: &str) -> Result<()> {
        let request = self.apply_auth(self.client.post(self.build_url(path)));
        let response = request.send().await.context("Failed to send request")?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "API request failed with status {}: {}",
                status,
                error_text
            ));
        }
        Ok(())
    }

    /// PUT a JSON body, deserializing the JSON response.
    pub async fn put_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.client.put(self.build_url(path)).json(body);
        let request = self.apply_auth(request);
        let response = request.send().await.context("Failed to send request")?;
        Self::handle(response).await
    }

    /// DELETE with query parameters.
    pub async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let mut request = self.client.delete(self.build_url(path));
        request = self.apply_auth(request);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await.context("Failed to send request")?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "API request failed with status {}: {}",
                status,
                error_text
            ));
        }
        Ok(())
    }

    /// Raw client for custom requests.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

pub use labtasker_core::models::{
    HealthCheckResponse, QueueCreateResponse, QueueGetResponse, Task, TaskFetchResponse,
    TaskLsResponse, TaskSubmitResponse, Worker, WorkerCreateResponse, WorkerLsResponse,
};
