//! One batch lifecycle over three provider batch models.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RouterError;
use crate::provider::ProviderClient;
use crate::types::{CompletionRequest, CompletionResponse, Feature, Provider};

/// A completion request tagged with a caller-supplied id, unique within a
/// batch, used to match results back to requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub custom_id: String,
    pub request: CompletionRequest,
}

impl BatchRequest {
    pub fn new(custom_id: impl Into<String>, request: CompletionRequest) -> Self {
        Self {
            custom_id: custom_id.into(),
            request,
        }
    }
}

/// Canonical batch status across all providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Pending,
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl BatchStatus {
    /// True once the batch can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Cancelled
                | BatchStatus::Expired
        )
    }
}

/// Progress counters for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

/// A point-in-time snapshot of a batch job. Holds no resources; re-fetch
/// for fresh state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub provider: Provider,
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub counts: BatchCounts,
    /// Provider-specific extras (file ids, operation state, results URL).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// One result line from a completed batch: the caller's custom id plus
/// either a response or an error, never both.
#[derive(Debug)]
pub struct BatchResult {
    pub custom_id: String,
    pub outcome: Result<CompletionResponse, RouterError>,
}

impl BatchResult {
    pub fn response(&self) -> Option<&CompletionResponse> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RouterError> {
        self.outcome.as_ref().err()
    }
}

/// Pagination options for listing batches.
#[derive(Debug, Clone, Default)]
pub struct ListBatchOptions {
    pub limit: Option<u32>,
    pub after: Option<String>,
}

/// Uniform batch operations over every registered provider.
pub struct BatchManager {
    providers: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl BatchManager {
    pub(crate) fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub(crate) fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.providers.insert(client.name(), client);
    }

    fn get_provider(&self, name: Provider) -> Result<&Arc<dyn ProviderClient>, RouterError> {
        let client = self.providers.get(&name).ok_or_else(|| {
            RouterError::provider_unavailable(name, "provider not registered")
        })?;
        if !client.supports(Feature::Batch) {
            return Err(RouterError::unsupported_feature(name, Feature::Batch));
        }
        Ok(client)
    }

    /// Creates a batch job from tagged requests.
    pub async fn create(
        &self,
        provider: Provider,
        requests: &[BatchRequest],
    ) -> Result<BatchJob, RouterError> {
        self.get_provider(provider)?.create_batch(requests).await
    }

    /// Fetches a fresh status snapshot.
    pub async fn get(&self, provider: Provider, batch_id: &str) -> Result<BatchJob, RouterError> {
        self.get_provider(provider)?.get_batch(batch_id).await
    }

    /// Fetches the results of a completed batch, one entry per request.
    pub async fn get_results(
        &self,
        provider: Provider,
        batch_id: &str,
    ) -> Result<Vec<BatchResult>, RouterError> {
        self.get_provider(provider)?
            .get_batch_results(batch_id)
            .await
    }

    pub async fn cancel(&self, provider: Provider, batch_id: &str) -> Result<(), RouterError> {
        self.get_provider(provider)?.cancel_batch(batch_id).await
    }

    pub async fn list(
        &self,
        provider: Provider,
        opts: Option<&ListBatchOptions>,
    ) -> Result<Vec<BatchJob>, RouterError> {
        self.get_provider(provider)?.list_batches(opts).await
    }

    /// Polls until the batch reaches a terminal status or the token fires,
    /// returning the last fetched snapshot.
    pub async fn wait(
        &self,
        provider: Provider,
        batch_id: &str,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<BatchJob, RouterError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RouterError::cancelled().with_provider(provider));
                }
                _ = tokio::time::sleep(poll_interval) => {
                    let job = self.get(provider, batch_id).await?;
                    debug!(provider = %provider, batch_id, status = ?job.status, "batch poll");
                    if job.status.is_terminal() {
                        return Ok(job);
                    }
                }
            }
        }
    }
}
