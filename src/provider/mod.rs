//! Provider adapters: one per backend API, all behind [`ProviderClient`].

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub(crate) mod sse;

use async_trait::async_trait;

use crate::batch::{BatchJob, BatchRequest, BatchResult, ListBatchOptions};
use crate::error::RouterError;
use crate::types::{CompletionRequest, CompletionResponse, Feature, Provider, StreamReader};

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// The interface every provider adapter implements. Request in, response
/// out; no retries, no hidden state.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The provider tag this adapter serves.
    fn name(&self) -> Provider;

    /// Sends a completion request and returns the unified response.
    async fn complete(&self, req: &CompletionRequest)
        -> Result<CompletionResponse, RouterError>;

    /// Sends a streaming completion request and returns a stream reader
    /// over unified events.
    async fn stream(&self, req: &CompletionRequest)
        -> Result<Box<dyn StreamReader>, RouterError>;

    /// Whether this provider supports a capability.
    fn supports(&self, feature: Feature) -> bool;

    /// Known model identifiers for this provider.
    fn models(&self) -> Vec<String>;

    /// Creates a batch job from tagged requests.
    async fn create_batch(&self, requests: &[BatchRequest]) -> Result<BatchJob, RouterError>;

    /// Fetches a batch status snapshot.
    async fn get_batch(&self, batch_id: &str) -> Result<BatchJob, RouterError>;

    /// Fetches results of a completed batch.
    async fn get_batch_results(&self, batch_id: &str) -> Result<Vec<BatchResult>, RouterError>;

    /// Cancels a batch job.
    async fn cancel_batch(&self, batch_id: &str) -> Result<(), RouterError>;

    /// Lists batch jobs.
    async fn list_batches(
        &self,
        opts: Option<&ListBatchOptions>,
    ) -> Result<Vec<BatchJob>, RouterError>;
}

#[async_trait]
impl ProviderClient for Box<dyn ProviderClient> {
    fn name(&self) -> Provider {
        (**self).name()
    }

    async fn complete(&self, req: &CompletionRequest)
        -> Result<CompletionResponse, RouterError> {
        (**self).complete(req).await
    }

    async fn stream(&self, req: &CompletionRequest)
        -> Result<Box<dyn StreamReader>, RouterError> {
        (**self).stream(req).await
    }

    fn supports(&self, feature: Feature) -> bool {
        (**self).supports(feature)
    }

    fn models(&self) -> Vec<String> {
        (**self).models()
    }

    async fn create_batch(&self, requests: &[BatchRequest]) -> Result<BatchJob, RouterError> {
        (**self).create_batch(requests).await
    }

    async fn get_batch(&self, batch_id: &str) -> Result<BatchJob, RouterError> {
        (**self).get_batch(batch_id).await
    }

    async fn get_batch_results(&self, batch_id: &str) -> Result<Vec<BatchResult>, RouterError> {
        (**self).get_batch_results(batch_id).await
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<(), RouterError> {
        (**self).cancel_batch(batch_id).await
    }

    async fn list_batches(
        &self,
        opts: Option<&ListBatchOptions>,
    ) -> Result<Vec<BatchJob>, RouterError> {
        (**self).list_batches(opts).await
    }
}

/// Common adapter configuration. Credentials come in here and nowhere else.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub http_client: Option<reqwest::Client>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry budget hint for callers; the adapters never retry.
    pub max_retries: u32,
    pub debug: bool,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            http_client: None,
            timeout_secs: 120,
            max_retries: 3,
            debug: false,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Classifies a transport-level failure from the HTTP client.
pub(crate) fn transport_error(provider: Provider, err: reqwest::Error) -> RouterError {
    if err.is_timeout() {
        RouterError::timeout(provider).with_cause(err)
    } else {
        RouterError::provider_unavailable(provider, "request failed").with_cause(err)
    }
}

pub(crate) fn is_false(v: &bool) -> bool {
    !*v
}
