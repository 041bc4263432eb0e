//! Unified error taxonomy surfaced by the router and every adapter.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::types::{Feature, Provider};

/// Error kind, stable across providers. Two errors with the same code are
/// the same kind of failure regardless of origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorCode {
    /// Malformed input before or at the provider boundary.
    #[error("invalid_request")]
    InvalidRequest,
    /// Credentials rejected by the provider.
    #[error("authentication_error")]
    Authentication,
    /// 401 from the provider.
    #[error("invalid_api_key")]
    InvalidApiKey,
    /// 429 from the provider.
    #[error("rate_limit")]
    RateLimit,
    /// 5xx or unrecognized failure.
    #[error("server_error")]
    ServerError,
    /// Deadline exceeded, provider timeout, or caller cancellation.
    #[error("timeout")]
    Timeout,
    /// Request asks for a capability the provider lacks.
    #[error("unsupported_feature")]
    UnsupportedFeature,
    /// Provider not registered or network unreachable.
    #[error("provider_unavailable")]
    ProviderUnavailable,
    /// 404 for the requested model.
    #[error("model_not_found")]
    ModelNotFound,
    /// 400 with a context/token signal.
    #[error("context_length_exceeded")]
    ContextLength,
    /// Provider refused on safety grounds.
    #[error("content_filter")]
    ContentFilter,
}

/// The error type returned by every operation in this crate.
///
/// Prints as `[{provider}] {code}: {message}` when a provider is attached,
/// otherwise `{code}: {message}`. Underlying causes are chained through
/// [`std::error::Error::source`].
#[derive(Debug)]
pub struct RouterError {
    code: ErrorCode,
    message: String,
    provider: Option<Provider>,
    status: Option<u16>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    details: HashMap<String, Value>,
}

impl RouterError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            status: None,
            source: None,
            details: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.source = Some(cause.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<Provider> {
        self.provider
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn details(&self) -> &HashMap<String, Value> {
        &self.details
    }

    /// Same kind of failure: equality by code alone.
    pub fn same_kind(&self, other: &RouterError) -> bool {
        self.code == other.code
    }

    /// Rate limits, server errors, and timeouts are safe to retry. The
    /// crate never retries on its own; this exists for caller policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::RateLimit | ErrorCode::ServerError | ErrorCode::Timeout
        )
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Authentication | ErrorCode::InvalidApiKey
        )
    }

    // Constructors, one per code.

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn authentication(provider: Provider, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Authentication, message).with_provider(provider)
    }

    pub fn invalid_api_key(provider: Provider) -> Self {
        Self::new(ErrorCode::InvalidApiKey, "invalid or missing API key")
            .with_provider(provider)
            .with_status(401)
    }

    pub fn rate_limit(provider: Provider, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimit, message)
            .with_provider(provider)
            .with_status(429)
    }

    pub fn server_error(provider: Provider, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, message).with_provider(provider)
    }

    pub fn timeout(provider: Provider) -> Self {
        Self::new(ErrorCode::Timeout, "request timed out").with_provider(provider)
    }

    /// Caller-driven cancellation surfaces through the timeout code; the
    /// taxonomy is closed.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Timeout, "operation cancelled")
    }

    pub fn unsupported_feature(provider: Provider, feature: Feature) -> Self {
        Self::new(
            ErrorCode::UnsupportedFeature,
            format!("provider {provider} does not support feature: {feature}"),
        )
        .with_provider(provider)
    }

    pub fn provider_unavailable(provider: Provider, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderUnavailable, message).with_provider(provider)
    }

    pub fn model_not_found(provider: Provider, model: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ModelNotFound,
            format!("model not found: {}", model.into()),
        )
        .with_provider(provider)
        .with_status(404)
    }

    pub fn context_length(provider: Provider, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ContextLength, message)
            .with_provider(provider)
            .with_status(400)
    }

    pub fn content_filter(provider: Provider, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ContentFilter, message).with_provider(provider)
    }

    /// Maps an HTTP error status from a provider to the taxonomy. The 400
    /// branch inspects the message for a context/token signal.
    pub fn from_status(provider: Provider, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::invalid_api_key(provider),
            429 => Self::rate_limit(provider, message).with_status(status),
            404 => Self::model_not_found(provider, message).with_status(status),
            400 => {
                if message.contains("context") || message.contains("token") {
                    Self::context_length(provider, message).with_status(status)
                } else {
                    Self::invalid_request(message)
                        .with_provider(provider)
                        .with_status(status)
                }
            }
            _ => Self::server_error(provider, message).with_status(status),
        }
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(p) => write!(f, "[{p}] {}: {}", self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
