//! Provider-agnostic LLM client: one request/response vocabulary and one
//! set of operations (completion, streaming, batch) over the OpenAI,
//! Anthropic, and Gemini APIs.
//!
//! ```no_run
//! use switchboard::{CompletionRequest, Message, Provider, Role, Router};
//!
//! # async fn run() -> Result<(), switchboard::RouterError> {
//! let router = Router::builder()
//!     .with_openai("sk-...")
//!     .with_anthropic("sk-ant-...")
//!     .build()?;
//!
//! let response = router
//!     .complete(
//!         &CompletionRequest::new(Provider::OpenAi, "gpt-4o-mini")
//!             .with_messages(vec![Message::text(Role::User, "Say hello")]),
//!     )
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod error;
pub mod provider;
pub mod schema;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::batch::BatchManager;
use crate::provider::{AnthropicClient, GeminiClient, OpenAiClient, ProviderClient, ProviderConfig};

pub use crate::batch::{
    BatchCounts, BatchJob, BatchRequest, BatchResult, BatchStatus, ListBatchOptions,
};
pub use crate::error::{ErrorCode, RouterError};
pub use crate::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Feature, JsonSchema, Message, Provider,
    ResponseFormat, Role, StopReason, StreamEvent, StreamReader, Tool, ToolCall, ToolChoice,
    ToolChoiceMode, Usage,
};

/// What to do when a request needs a capability its provider lacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnsupportedFeaturePolicy {
    /// Fail the call before any HTTP is issued.
    #[default]
    Error,
    /// Log a warning and proceed; the provider will typically ignore the
    /// feature.
    Warn,
    /// Proceed silently.
    Ignore,
}

/// Routes unified requests to registered provider adapters.
///
/// Holds only read-only configuration after construction and may be shared
/// freely across tasks.
pub struct Router {
    providers: HashMap<Provider, Arc<dyn ProviderClient>>,
    batch: BatchManager,
    policy: UnsupportedFeaturePolicy,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Sends a completion request to its provider, after validating the
    /// request's feature requirements against the provider's capabilities.
    pub async fn complete(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, RouterError> {
        let provider = self.get(req.provider)?;
        self.check_features(provider.as_ref(), req)?;
        provider.complete(req).await
    }

    /// [`Router::complete`] with cooperative cancellation.
    pub async fn complete_with_cancel(
        &self,
        req: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, RouterError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(RouterError::cancelled().with_provider(req.provider)),
            result = self.complete(req) => result,
        }
    }

    /// Opens a unified event stream for the request.
    pub async fn stream(
        &self,
        req: &CompletionRequest,
    ) -> Result<Box<dyn StreamReader>, RouterError> {
        let provider = self.get(req.provider)?;
        if !provider.supports(Feature::Streaming) {
            return Err(RouterError::unsupported_feature(
                req.provider,
                Feature::Streaming,
            ));
        }
        self.check_features(provider.as_ref(), req)?;
        provider.stream(req).await
    }

    /// [`Router::stream`] with a cancellation token attached to the
    /// returned reader.
    pub async fn stream_with_cancel(
        &self,
        req: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<Box<dyn StreamReader>, RouterError> {
        let mut reader = self.stream(req).await?;
        reader.attach_cancel(cancel);
        Ok(reader)
    }

    /// Batch operations across all registered providers.
    pub fn batch(&self) -> &BatchManager {
        &self.batch
    }

    /// Direct access to a provider adapter.
    pub fn provider(&self, name: Provider) -> Result<Arc<dyn ProviderClient>, RouterError> {
        self.get(name)
    }

    /// All registered provider tags.
    pub fn providers(&self) -> Vec<Provider> {
        self.providers.keys().copied().collect()
    }

    pub fn supports_feature(&self, name: Provider, feature: Feature) -> bool {
        self.providers
            .get(&name)
            .map(|p| p.supports(feature))
            .unwrap_or(false)
    }

    pub fn models(&self, name: Provider) -> Result<Vec<String>, RouterError> {
        Ok(self.get(name)?.models())
    }

    fn get(&self, name: Provider) -> Result<Arc<dyn ProviderClient>, RouterError> {
        self.providers.get(&name).cloned().ok_or_else(|| {
            RouterError::provider_unavailable(name, "provider not configured")
        })
    }

    /// Derives the capabilities a request needs and applies the policy for
    /// any the provider lacks. Feature handling never happens inside the
    /// adapters.
    fn check_features(
        &self,
        provider: &dyn ProviderClient,
        req: &CompletionRequest,
    ) -> Result<(), RouterError> {
        for feature in required_features(req) {
            if provider.supports(feature) {
                continue;
            }
            match self.policy {
                UnsupportedFeaturePolicy::Error => {
                    return Err(RouterError::unsupported_feature(req.provider, feature));
                }
                UnsupportedFeaturePolicy::Warn => {
                    warn!(provider = %req.provider, feature = %feature, "unsupported feature requested, proceeding");
                }
                UnsupportedFeaturePolicy::Ignore => {}
            }
        }
        Ok(())
    }
}

fn required_features(req: &CompletionRequest) -> Vec<Feature> {
    let mut features = Vec::new();

    match &req.response_format {
        Some(ResponseFormat::JsonSchema { .. }) => features.push(Feature::StructuredOutput),
        Some(ResponseFormat::Json) => features.push(Feature::JsonMode),
        _ => {}
    }

    if !req.tools.is_empty() {
        features.push(Feature::Tools);
    }

    let has_image = req.messages.iter().any(|m| {
        m.content
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }))
    });
    if has_image {
        features.push(Feature::Vision);
    }

    features
}

/// Builds a [`Router`] from provider registrations.
#[derive(Default)]
pub struct RouterBuilder {
    providers: Vec<Arc<dyn ProviderClient>>,
    policy: UnsupportedFeaturePolicy,
}

impl RouterBuilder {
    /// Registers any adapter implementing [`ProviderClient`].
    pub fn with_provider(mut self, client: impl ProviderClient + 'static) -> Self {
        self.providers.push(Arc::new(client));
        self
    }

    pub fn with_openai(self, api_key: impl Into<String>) -> Self {
        self.with_provider(OpenAiClient::new(api_key))
    }

    pub fn with_openai_config(self, config: ProviderConfig) -> Self {
        self.with_provider(OpenAiClient::with_config(config))
    }

    pub fn with_anthropic(self, api_key: impl Into<String>) -> Self {
        self.with_provider(AnthropicClient::new(api_key))
    }

    pub fn with_anthropic_config(self, config: ProviderConfig) -> Self {
        self.with_provider(AnthropicClient::with_config(config))
    }

    pub fn with_gemini(self, api_key: impl Into<String>) -> Self {
        self.with_provider(GeminiClient::new(api_key))
    }

    pub fn with_gemini_config(self, config: ProviderConfig) -> Self {
        self.with_provider(GeminiClient::with_config(config))
    }

    pub fn with_unsupported_feature_policy(mut self, policy: UnsupportedFeaturePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<Router, RouterError> {
        if self.providers.is_empty() {
            return Err(RouterError::invalid_request(
                "at least one provider must be configured",
            ));
        }

        let mut providers: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
        let mut batch = BatchManager::new();
        for client in self.providers {
            batch.register(client.clone());
            providers.insert(client.name(), client);
        }

        Ok(Router {
            providers,
            batch,
            policy: self.policy,
        })
    }
}
