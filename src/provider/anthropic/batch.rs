//! Batch lifecycle: inline requests, results fetched from a results URL.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::wire::{BatchCreate, BatchItem, BatchListResponse, BatchResponse, BatchResultLine};
use super::{transform, AnthropicClient};
use crate::batch::{BatchCounts, BatchJob, BatchRequest, BatchResult, BatchStatus, ListBatchOptions};
use crate::error::RouterError;
use crate::provider::transport_error;
use crate::types::Provider;

impl AnthropicClient {
    pub(super) async fn create_batch_job(
        &self,
        requests: &[BatchRequest],
    ) -> Result<BatchJob, RouterError> {
        let mut items = Vec::with_capacity(requests.len());
        for req in requests {
            items.push(BatchItem {
                custom_id: req.custom_id.clone(),
                params: transform::request(&req.request, false)?,
            });
        }
        debug!(requests = items.len(), "creating message batch");

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/v1/messages/batches", self.base_url),
            )
            .json(&BatchCreate { requests: items })
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let batch: BatchResponse = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::Anthropic, "failed to decode response")
                .with_cause(e)
        })?;
        Ok(convert_batch_job(&batch))
    }

    pub(super) async fn fetch_batch(&self, batch_id: &str) -> Result<BatchJob, RouterError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                format!("{}/v1/messages/batches/{batch_id}", self.base_url),
            )
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let batch: BatchResponse = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::Anthropic, "failed to decode response")
                .with_cause(e)
        })?;
        Ok(convert_batch_job(&batch))
    }

    pub(super) async fn fetch_batch_results(
        &self,
        batch_id: &str,
    ) -> Result<Vec<BatchResult>, RouterError> {
        let job = self.fetch_batch(batch_id).await?;
        let results_url = job
            .metadata
            .get("results_url")
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                RouterError::invalid_request("batch has no results URL")
                    .with_provider(Provider::Anthropic)
            })?;

        let resp = self
            .request(reqwest::Method::GET, results_url.clone())
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let body = resp.text().await.map_err(|e| {
            RouterError::server_error(Provider::Anthropic, "failed to read results").with_cause(e)
        })?;

        Ok(parse_result_lines(&body))
    }

    pub(super) async fn cancel_batch_job(&self, batch_id: &str) -> Result<(), RouterError> {
        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/v1/messages/batches/{batch_id}/cancel", self.base_url),
            )
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        Ok(())
    }

    pub(super) async fn list_batch_jobs(
        &self,
        opts: Option<&ListBatchOptions>,
    ) -> Result<Vec<BatchJob>, RouterError> {
        let mut req = self.request(
            reqwest::Method::GET,
            format!("{}/v1/messages/batches", self.base_url),
        );
        if let Some(opts) = opts {
            if let Some(limit) = opts.limit {
                req = req.query(&[("limit", limit.to_string())]);
            }
            if let Some(after) = &opts.after {
                req = req.query(&[("after_id", after)]);
            }
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(Provider::Anthropic, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let list: BatchListResponse = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::Anthropic, "failed to decode response")
                .with_cause(e)
        })?;
        Ok(list.data.iter().map(convert_batch_job).collect())
    }
}

fn parse_result_lines(body: &str) -> Vec<BatchResult> {
    let mut results = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let parsed: BatchResultLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(_) => continue,
        };

        let outcome = match (parsed.result.kind.as_str(), parsed.result.message) {
            ("succeeded", Some(message)) => Ok(transform::response(&message)),
            _ => {
                let message = parsed
                    .result
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "batch item failed".into());
                Err(RouterError::server_error(Provider::Anthropic, message))
            }
        };

        results.push(BatchResult {
            custom_id: parsed.custom_id,
            outcome,
        });
    }
    results
}

pub(crate) fn convert_batch_job(batch: &BatchResponse) -> BatchJob {
    let counts = batch.request_counts;
    let total =
        counts.processing + counts.succeeded + counts.errored + counts.canceled + counts.expired;

    let mut metadata = HashMap::new();
    metadata.insert(
        "results_url".to_string(),
        batch.results_url.clone().unwrap_or_default(),
    );

    BatchJob {
        id: batch.id.clone(),
        provider: Provider::Anthropic,
        status: convert_status(&batch.processing_status),
        created_at: parse_rfc3339(batch.created_at.as_deref()),
        completed_at: parse_rfc3339(batch.ended_at.as_deref()),
        expires_at: parse_rfc3339(batch.expires_at.as_deref()),
        counts: BatchCounts {
            total,
            completed: counts.succeeded,
            failed: counts.errored + counts.expired,
        },
        metadata,
    }
}

fn parse_rfc3339(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn convert_status(status: &str) -> BatchStatus {
    match status {
        "in_progress" | "canceling" => BatchStatus::InProgress,
        "ended" => BatchStatus::Completed,
        _ => BatchStatus::Pending,
    }
}
