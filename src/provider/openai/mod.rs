//! Adapter for the chat-completions API (bearer-token auth, SSE `data:`
//! line streaming, file-upload batches).

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

use stream::OpenAiStreamReader;
use wire::{ChatCompletionResponse, ErrorEnvelope};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    config: ProviderConfig,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
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

    /// Authenticated request without a forced JSON content type (multipart
    /// uploads set their own).
    fn authorized(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.authorized(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    async fn error_from_response(&self, resp: reqwest::Response) -> RouterError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error)
            .map(|e| e.message)
            .unwrap_or(body);
        RouterError::from_status(Provider::OpenAi, status, message)
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn name(&self) -> Provider {
        Provider::OpenAi
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
            "gpt-4o",
            "gpt-4o-mini",
            "gpt-4-turbo",
            "gpt-4",
            "gpt-3.5-turbo",
            "o1",
            "o1-mini",
            "o1-preview",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    async fn complete(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, RouterError> {
        let wire = transform::request(req, false)?;
        debug!(model = %req.model, messages = wire.messages.len(), "openai completion");

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/chat/completions", self.base_url),
            )
            .json(&wire)
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        let body: ChatCompletionResponse = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::OpenAi, "failed to decode response").with_cause(e)
        })?;
        transform::response(&body)
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<Box<dyn StreamReader>, RouterError> {
        let wire = transform::request(req, true)?;
        debug!(model = %req.model, "openai streaming completion");

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/chat/completions", self.base_url),
            )
            .json(&wire)
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        Ok(Box::new(OpenAiStreamReader::new(sse::event_stream(
            Provider::OpenAi,
            resp,
        ))))
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
