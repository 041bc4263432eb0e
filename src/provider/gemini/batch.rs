//! Batch lifecycle: inline requests submitted as a long-running operation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::wire::{
    BatchConfig, BatchGenerateContentRequest, BatchListResponse, BatchRequestItem, InlinedResponse,
    InputConfig, Operation, RequestMetadata, RequestsInput,
};
use super::{transform, GeminiClient};
use crate::batch::{BatchCounts, BatchJob, BatchRequest, BatchResult, BatchStatus, ListBatchOptions};
use crate::error::RouterError;
use crate::provider::transport_error;
use crate::types::Provider;

impl GeminiClient {
    pub(super) async fn create_batch_job(
        &self,
        requests: &[BatchRequest],
    ) -> Result<BatchJob, RouterError> {
        if requests.is_empty() {
            return Err(
                RouterError::invalid_request("no requests provided").with_provider(Provider::Gemini)
            );
        }

        // all requests in a batch run against one model
        let model = requests[0].request.model.clone();
        let mut items = Vec::with_capacity(requests.len());
        for req in requests {
            items.push(BatchRequestItem {
                request: transform::request(&req.request)?,
                metadata: RequestMetadata {
                    key: req.custom_id.clone(),
                },
            });
        }
        debug!(model = %model, requests = items.len(), "creating batch operation");

        let body = BatchGenerateContentRequest {
            batch: BatchConfig {
                display_name: Some(format!("batch-{}", Utc::now().timestamp())),
                input_config: InputConfig {
                    requests: RequestsInput { requests: items },
                },
            },
        };

        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/models/{model}:batchGenerateContent", self.base_url),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Provider::Gemini, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let operation: Operation = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::Gemini, "failed to decode response").with_cause(e)
        })?;
        Ok(convert_batch_job(&operation, Some(&model)))
    }

    async fn fetch_operation(&self, batch_id: &str) -> Result<Operation, RouterError> {
        let name = qualified_name(batch_id);
        let resp = self
            .request(reqwest::Method::GET, format!("{}/{name}", self.base_url))
            .send()
            .await
            .map_err(|e| transport_error(Provider::Gemini, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::Gemini, "failed to decode response").with_cause(e)
        })
    }

    pub(super) async fn fetch_batch(&self, batch_id: &str) -> Result<BatchJob, RouterError> {
        let operation = self.fetch_operation(batch_id).await?;
        Ok(convert_batch_job(&operation, None))
    }

    pub(super) async fn fetch_batch_results(
        &self,
        batch_id: &str,
    ) -> Result<Vec<BatchResult>, RouterError> {
        let operation = self.fetch_operation(batch_id).await?;
        let job = convert_batch_job(&operation, None);
        if job.status != BatchStatus::Completed {
            return Err(RouterError::invalid_request(format!(
                "batch job is not complete, status: {:?}",
                job.status
            ))
            .with_provider(Provider::Gemini));
        }

        let Some(payload) = operation.response else {
            return Err(RouterError::server_error(
                Provider::Gemini,
                "no results found in batch response",
            ));
        };

        // inline results win; otherwise a named file must be downloaded
        if let Some(inlined) = &payload.inlined_responses {
            if !inlined.inlined_responses.is_empty() {
                return Ok(inlined
                    .inlined_responses
                    .iter()
                    .map(|r| convert_result(r))
                    .collect());
            }
        }

        if let Some(file) = payload.responses_file.filter(|f| !f.is_empty()) {
            return self.download_batch_results(&file).await;
        }

        Err(RouterError::server_error(
            Provider::Gemini,
            "no results found in batch response",
        ))
    }

    async fn download_batch_results(&self, file: &str) -> Result<Vec<BatchResult>, RouterError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                format!("{}/{file}:download", self.base_url),
            )
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| transport_error(Provider::Gemini, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let body = resp.text().await.map_err(|e| {
            RouterError::server_error(Provider::Gemini, "failed to read results").with_cause(e)
        })?;

        let mut results = Vec::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            let parsed: InlinedResponse = match serde_json::from_str(line) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };
            results.push(convert_result(&parsed));
        }
        Ok(results)
    }

    pub(super) async fn cancel_batch_job(&self, batch_id: &str) -> Result<(), RouterError> {
        let name = qualified_name(batch_id);
        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/{name}:cancel", self.base_url),
            )
            .send()
            .await
            .map_err(|e| transport_error(Provider::Gemini, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        Ok(())
    }

    pub(super) async fn list_batch_jobs(
        &self,
        opts: Option<&ListBatchOptions>,
    ) -> Result<Vec<BatchJob>, RouterError> {
        let mut req = self.request(reqwest::Method::GET, format!("{}/batches", self.base_url));
        if let Some(opts) = opts {
            if let Some(limit) = opts.limit {
                req = req.query(&[("pageSize", limit.to_string())]);
            }
            if let Some(after) = &opts.after {
                req = req.query(&[("pageToken", after)]);
            }
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(Provider::Gemini, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let list: BatchListResponse = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::Gemini, "failed to decode response").with_cause(e)
        })?;
        Ok(list
            .batches
            .iter()
            .map(|op| convert_batch_job(op, None))
            .collect())
    }
}

fn qualified_name(batch_id: &str) -> String {
    if batch_id.starts_with("batches/") {
        batch_id.to_string()
    } else {
        format!("batches/{batch_id}")
    }
}

fn convert_result(resp: &InlinedResponse) -> BatchResult {
    let custom_id = resp
        .metadata
        .as_ref()
        .map(|m| m.key.clone())
        .unwrap_or_default();

    let outcome = if let Some(err) = &resp.error {
        Err(RouterError::server_error(
            Provider::Gemini,
            err.message.clone(),
        ))
    } else if let Some(response) = &resp.response {
        transform::response(response, "")
    } else {
        Err(RouterError::server_error(
            Provider::Gemini,
            "batch item carried neither response nor error",
        ))
    };

    BatchResult { custom_id, outcome }
}

pub(crate) fn convert_batch_job(operation: &Operation, model: Option<&str>) -> BatchJob {
    let mut metadata = HashMap::new();
    let mut created_at = None;

    if let Some(meta) = &operation.metadata {
        metadata.insert("state".to_string(), meta.state.clone());
        if let Some(display_name) = &meta.display_name {
            metadata.insert("display_name".to_string(), display_name.clone());
        }
        created_at = meta
            .create_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
    }
    if let Some(model) = model {
        metadata.insert("model".to_string(), model.to_string());
    }

    let mut counts = BatchCounts::default();
    if let Some(payload) = &operation.response {
        if let Some(file) = &payload.responses_file {
            metadata.insert("responses_file".to_string(), file.clone());
        }
        if let Some(inlined) = &payload.inlined_responses {
            let n = inlined.inlined_responses.len() as u32;
            if n > 0 {
                counts.total = n;
                counts.completed = n;
            }
        }
    }

    BatchJob {
        id: operation.name.clone(),
        provider: Provider::Gemini,
        status: derive_status(operation),
        created_at,
        completed_at: None,
        expires_at: None,
        counts,
        metadata,
    }
}

/// The canonical status is derived, never stored: the `done` flag plus the
/// error field dominate, then the state enum under either prefix.
fn derive_status(operation: &Operation) -> BatchStatus {
    if operation.done {
        return if operation.error.is_some() {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
    }

    let state = operation
        .metadata
        .as_ref()
        .map(|m| m.state.as_str())
        .unwrap_or("");
    match state {
        "JOB_STATE_PENDING" | "BATCH_STATE_PENDING" => BatchStatus::Pending,
        "JOB_STATE_RUNNING" | "BATCH_STATE_RUNNING" => BatchStatus::InProgress,
        "JOB_STATE_SUCCEEDED" | "BATCH_STATE_SUCCEEDED" => BatchStatus::Completed,
        "JOB_STATE_FAILED" | "BATCH_STATE_FAILED" => BatchStatus::Failed,
        "JOB_STATE_CANCELLED" | "BATCH_STATE_CANCELLED" => BatchStatus::Cancelled,
        "JOB_STATE_EXPIRED" | "BATCH_STATE_EXPIRED" => BatchStatus::Expired,
        _ => BatchStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operation(body: serde_json::Value) -> Operation {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn done_with_error_is_failed() {
        let op = operation(json!({
            "name": "batches/1",
            "done": true,
            "error": {"code": 13, "message": "internal"}
        }));
        assert_eq!(derive_status(&op), BatchStatus::Failed);
    }

    #[test]
    fn done_without_error_is_completed() {
        let op = operation(json!({"name": "batches/2", "done": true}));
        assert_eq!(derive_status(&op), BatchStatus::Completed);
    }

    #[test]
    fn both_state_prefixes_are_recognized() {
        for (state, expected) in [
            ("JOB_STATE_PENDING", BatchStatus::Pending),
            ("BATCH_STATE_PENDING", BatchStatus::Pending),
            ("JOB_STATE_RUNNING", BatchStatus::InProgress),
            ("BATCH_STATE_RUNNING", BatchStatus::InProgress),
            ("JOB_STATE_SUCCEEDED", BatchStatus::Completed),
            ("BATCH_STATE_SUCCEEDED", BatchStatus::Completed),
            ("JOB_STATE_FAILED", BatchStatus::Failed),
            ("BATCH_STATE_FAILED", BatchStatus::Failed),
            ("JOB_STATE_CANCELLED", BatchStatus::Cancelled),
            ("BATCH_STATE_CANCELLED", BatchStatus::Cancelled),
            ("JOB_STATE_EXPIRED", BatchStatus::Expired),
            ("BATCH_STATE_EXPIRED", BatchStatus::Expired),
            ("SOMETHING_ELSE", BatchStatus::Pending),
        ] {
            let op = operation(json!({
                "name": "batches/3",
                "done": false,
                "metadata": {"state": state}
            }));
            assert_eq!(derive_status(&op), expected, "{state}");
        }
    }

    #[test]
    fn job_conversion_collects_metadata_and_counts() {
        let op = operation(json!({
            "name": "batches/xyz",
            "done": true,
            "metadata": {
                "state": "BATCH_STATE_SUCCEEDED",
                "displayName": "batch-1700000000",
                "createTime": "2025-06-01T10:00:00Z"
            },
            "response": {
                "inlinedResponses": {
                    "inlinedResponses": [
                        {"metadata": {"key": "r1"}, "response": {"candidates": []}},
                        {"metadata": {"key": "r2"}, "error": {"code": 3, "message": "bad"}}
                    ]
                }
            }
        }));
        let job = convert_batch_job(&op, Some("gemini-2.0-flash"));
        assert_eq!(job.id, "batches/xyz");
        assert_eq!(job.status, BatchStatus::Completed);
        assert_eq!(job.counts.total, 2);
        assert_eq!(job.metadata["model"], "gemini-2.0-flash");
        assert_eq!(job.metadata["display_name"], "batch-1700000000");
        assert!(job.created_at.is_some());
    }

    #[test]
    fn inline_results_convert_per_item() {
        let item: InlinedResponse = serde_json::from_value(json!({
            "metadata": {"key": "r1"},
            "response": {
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "hi"}]},
                    "finishReason": "STOP"
                }]
            }
        }))
        .unwrap();
        let result = convert_result(&item);
        assert_eq!(result.custom_id, "r1");
        assert_eq!(result.response().unwrap().text(), "hi");

        let failed: InlinedResponse = serde_json::from_value(json!({
            "metadata": {"key": "r2"},
            "error": {"code": 3, "message": "quota"}
        }))
        .unwrap();
        let result = convert_result(&failed);
        assert_eq!(result.custom_id, "r2");
        assert!(result.error().unwrap().message().contains("quota"));
    }

    #[test]
    fn batch_id_qualification() {
        assert_eq!(qualified_name("abc"), "batches/abc");
        assert_eq!(qualified_name("batches/abc"), "batches/abc");
    }
}
