//! Adapter for the messages API (version + API-key headers, typed SSE
//! streaming, inline batches with a results URL).

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

use stream::AnthropicStreamReader;
use wire::{ErrorEnvelope, MessagesResponse};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const BETA_FEATURES: &str = "prompt-caching-2024-07-31,output-128k-2025-02-19";

pub struct AnthropicClient {
    config: ProviderConfig,
    http: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
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

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("anthropic-beta", BETA_FEATURES)
    }

    async fn error_from_response(&self, resp: reqwest::Response) -> RouterError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error)
            .map(|e| e.message)
            .unwrap_or(body);
        RouterError::from_status(Provider::Anthropic, status, message)
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn name(&self) -> Provider {
        Provider::Anthropic
    }

    fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Streaming
            | Feature::StructuredOutput
            | Feature::Tools
            | Feature::Vision
            | Feature::Batch => true,
            // no untyped JSON mode, only schema-backed structured output
            Feature::JsonMode => false,
        }
    }

    fn models(&self) -> Vec<String> {
        [
            "claude-sonnet-4-20250514",
            "claude-opus-4-20250514",
            "claude-3-5-sonnet-20241022",
            "claude-3-5-haiku-20241022",
            "claude-3-opus-20240229",
            "claude-3-sonnet-20240229",
            "claude-3-haiku-20240307",
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
        debug!(model = %req.model, messages = wire.messages.len(), "anthropic completion");

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/v1/messages", self.base_url),
            )
            .json(&wire)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        let body: MessagesResponse = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::Anthropic, "failed to decode response")
                .with_cause(e)
        })?;
        Ok(transform::response(&body))
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<Box<dyn StreamReader>, RouterError> {
        let wire = transform::request(req, true)?;
        debug!(model = %req.model, "anthropic streaming completion");

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/v1/messages", self.base_url),
            )
            .json(&wire)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }

        Ok(Box::new(AnthropicStreamReader::new(sse::event_stream(
            Provider::Anthropic,
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
