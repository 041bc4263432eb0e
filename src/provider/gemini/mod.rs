//! Adapter for the generateContent API (API key in the query string,
//! JSON-array stream framing, long-running-operation batches).

mod batch;
mod stream;
mod transform;
mod wire;

use async_trait::async_trait;
use tracing::debug;

use crate::batch::{BatchJob, BatchRequest, BatchResult, ListBatchOptions};
use crate::error::RouterError;
use crate::provider::{sse, transport_error, ProviderClient, ProviderConfig};
use crate::types::{CompletionRequest, CompletionResponse, Feature, Provider, StreamReader};

use stream::GeminiStreamReader;
use wire::{ErrorEnvelope, GenerateContentResponse};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    config: ProviderConfig,
    http: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_config(ProviderConfig::new(api_key))
    }

    pub fn with_config(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let http = config.http_client.clone().unwrap_or_default();
        Self {
            config,
            http,
            base_url,
        }
    }

    /// Auth rides in the query string on this API.
    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .query(&[("key", self.config.api_key.as_str())])
    }

    async fn error_from_response(&self, resp: reqwest::Response) -> RouterError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error)
            .map(|e| e.message)
            .unwrap_or(body);
        RouterError::from_status(Provider::Gemini, status, message)
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn name(&self) -> Provider {
        Provider::Gemini
    }

    fn supports(&self, feature: Feature) -> bool {
        matches!(
            feature,
            Feature::Streaming
                | Feature::StructuredOutput
                | Feature::Tools
                | Feature::Vision
                | Feature::Batch
                | Feature::JsonMode
        )
    }

    fn models(&self) -> Vec<String> {
        [
            "gemini-2.0-flash",
            "gemini-2.0-flash-lite",
            "gemini-1.5-pro",
            "gemini-1.5-flash",
            "gemini-1.5-flash-8b",
            "gemini-1.0-pro",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    async fn complete(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, RouterError> {
        let wire = transform::request(req)?;
        debug!(model = %req.model, contents = wire.contents.len(), "gemini completion");

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/models/{}:generateContent", self.base_url, req.model),
            )
            .json(&wire)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Gemini, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        let body: GenerateContentResponse = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::Gemini, "failed to decode response").with_cause(e)
        })?;
        transform::response(&body, &req.model)
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<Box<dyn StreamReader>, RouterError> {
        let wire = transform::request(req)?;
        debug!(model = %req.model, "gemini streaming completion");

        let resp = self
            .request(
                reqwest::Method::POST,
                format!(
                    "{}/models/{}:streamGenerateContent",
                    self.base_url, req.model
                ),
            )
            .json(&wire)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Gemini, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        Ok(Box::new(GeminiStreamReader::new(
            sse::byte_stream(Provider::Gemini, resp),
            req.model.clone(),
        )))
    }

    async fn create_batch(&self, requests: &[BatchRequest]) -> Result<BatchJob, RouterError> {
        self.create_batch_job(requests).await
    }

    async fn get_batch(&self, batch_id: &str) -> Result<BatchJob, RouterError> {
        self.fetch_batch(batch_id).await
    }

    async fn get_batch_results(&self, batch_id: &str) -> Result<Vec<BatchResult>, RouterError> {
        self.fetch_batch_results(batch_id).await
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<(), RouterError> {
        self.cancel_batch_job(batch_id).await
    }

    async fn list_batches(
        &self,
        opts: Option<&ListBatchOptions>,
    ) -> Result<Vec<BatchJob>, RouterError> {
        self.list_batch_jobs(opts).await
    }
}
