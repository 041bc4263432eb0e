//! Batch lifecycle: JSONL file upload plus a batch object over it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::wire::{ApiError, ChatCompletionResponse};
use super::{transform, OpenAiClient};
use crate::batch::{BatchCounts, BatchJob, BatchRequest, BatchResult, BatchStatus, ListBatchOptions};
use crate::error::RouterError;
use crate::provider::transport_error;
use crate::types::Provider;

#[derive(Debug, Serialize)]
struct BatchCreateRequest {
    input_file_id: String,
    endpoint: String,
    completion_window: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BatchObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub input_file_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub completed_at: i64,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub request_counts: Option<WireCounts>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireCounts {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

/// One line of the JSONL input file.
#[derive(Debug, Serialize)]
struct BatchInputLine {
    custom_id: String,
    method: String,
    url: String,
    body: Value,
}

/// One line of the JSONL output file.
#[derive(Debug, Deserialize)]
struct BatchOutputLine {
    #[serde(default)]
    custom_id: String,
    #[serde(default)]
    response: Option<BatchResponseData>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct BatchResponseData {
    body: ChatCompletionResponse,
}

#[derive(Debug, Deserialize)]
struct BatchList {
    #[serde(default)]
    data: Vec<BatchObject>,
}

#[derive(Debug, Deserialize)]
struct FileUploadResponse {
    id: String,
}

const COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";

impl OpenAiClient {
    pub(super) async fn create_batch_job(
        &self,
        requests: &[BatchRequest],
    ) -> Result<BatchJob, RouterError> {
        let mut jsonl = String::new();
        for req in requests {
            let wire = transform::request(&req.request, false)?;
            let line = BatchInputLine {
                custom_id: req.custom_id.clone(),
                method: "POST".into(),
                url: COMPLETIONS_ENDPOINT.into(),
                body: serde_json::to_value(&wire).map_err(|e| {
                    RouterError::invalid_request("failed to encode batch line").with_cause(e)
                })?,
            };
            jsonl.push_str(&serde_json::to_string(&line).map_err(|e| {
                RouterError::invalid_request("failed to encode batch line").with_cause(e)
            })?);
            jsonl.push('\n');
        }

        let file_id = self.upload_batch_file(jsonl).await?;
        debug!(file_id, requests = requests.len(), "batch input uploaded");

        let create = BatchCreateRequest {
            input_file_id: file_id,
            endpoint: COMPLETIONS_ENDPOINT.into(),
            completion_window: "24h".into(),
        };
        let resp = self
            .request(reqwest::Method::POST, format!("{}/batches", self.base_url))
            .json(&create)
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let batch: BatchObject = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::OpenAi, "failed to decode response").with_cause(e)
        })?;
        Ok(convert_batch_job(&batch))
    }

    async fn upload_batch_file(&self, jsonl: String) -> Result<String, RouterError> {
        let part = reqwest::multipart::Part::bytes(jsonl.into_bytes())
            .file_name("batch_input.jsonl")
            .mime_str("application/jsonl")
            .map_err(|e| {
                RouterError::invalid_request("failed to build batch upload").with_cause(e)
            })?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let resp = self
            .authorized(reqwest::Method::POST, format!("{}/files", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let file: FileUploadResponse = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::OpenAi, "failed to decode upload response")
                .with_cause(e)
        })?;
        Ok(file.id)
    }

    pub(super) async fn fetch_batch(&self, batch_id: &str) -> Result<BatchJob, RouterError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                format!("{}/batches/{batch_id}", self.base_url),
            )
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let batch: BatchObject = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::OpenAi, "failed to decode response").with_cause(e)
        })?;
        Ok(convert_batch_job(&batch))
    }

    pub(super) async fn fetch_batch_results(
        &self,
        batch_id: &str,
    ) -> Result<Vec<BatchResult>, RouterError> {
        let job = self.fetch_batch(batch_id).await?;
        let output_file_id = job
            .metadata
            .get("output_file_id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                RouterError::invalid_request("batch has no output file")
                    .with_provider(Provider::OpenAi)
            })?;

        let resp = self
            .request(
                reqwest::Method::GET,
                format!("{}/files/{output_file_id}/content", self.base_url),
            )
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let body = resp.text().await.map_err(|e| {
            RouterError::server_error(Provider::OpenAi, "failed to read results").with_cause(e)
        })?;

        Ok(parse_output_lines(&body))
    }

    pub(super) async fn cancel_batch_job(&self, batch_id: &str) -> Result<(), RouterError> {
        let resp = self
            .request(
                reqwest::Method::POST,
                format!("{}/batches/{batch_id}/cancel", self.base_url),
            )
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

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
                req = req.query(&[("limit", limit.to_string())]);
            }
            if let Some(after) = &opts.after {
                req = req.query(&[("after", after)]);
            }
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(Provider::OpenAi, e))?;

        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let list: BatchList = resp.json().await.map_err(|e| {
            RouterError::server_error(Provider::OpenAi, "failed to decode response").with_cause(e)
        })?;
        Ok(list.data.iter().map(convert_batch_job).collect())
    }
}

fn parse_output_lines(body: &str) -> Vec<BatchResult> {
    let mut results = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let parsed: BatchOutputLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(_) => continue,
        };

        let outcome = if let Some(err) = parsed.error {
            Err(RouterError::server_error(Provider::OpenAi, err.message))
        } else if let Some(data) = parsed.response {
            transform::response(&data.body)
        } else {
            Err(RouterError::server_error(
                Provider::OpenAi,
                "batch line carried neither response nor error",
            ))
        };

        results.push(BatchResult {
            custom_id: parsed.custom_id,
            outcome,
        });
    }
    results
}

pub(crate) fn convert_batch_job(batch: &BatchObject) -> BatchJob {
    let mut metadata = HashMap::new();
    metadata.insert("input_file_id".to_string(), batch.input_file_id.clone());
    metadata.insert(
        "output_file_id".to_string(),
        batch.output_file_id.clone().unwrap_or_default(),
    );
    metadata.insert(
        "error_file_id".to_string(),
        batch.error_file_id.clone().unwrap_or_default(),
    );
    metadata.insert("endpoint".to_string(), batch.endpoint.clone());

    BatchJob {
        id: batch.id.clone(),
        provider: Provider::OpenAi,
        status: convert_status(&batch.status),
        created_at: timestamp(batch.created_at),
        completed_at: timestamp(batch.completed_at),
        expires_at: timestamp(batch.expires_at),
        counts: batch
            .request_counts
            .as_ref()
            .map(|c| BatchCounts {
                total: c.total,
                completed: c.completed,
                failed: c.failed,
            })
            .unwrap_or_default(),
        metadata,
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    (secs > 0).then(|| DateTime::<Utc>::from_timestamp(secs, 0)).flatten()
}

fn convert_status(status: &str) -> BatchStatus {
    match status {
        "validating" => BatchStatus::Validating,
        "in_progress" | "cancelling" => BatchStatus::InProgress,
        "finalizing" => BatchStatus::Finalizing,
        "completed" => BatchStatus::Completed,
        "failed" => BatchStatus::Failed,
        "expired" => BatchStatus::Expired,
        "cancelled" => BatchStatus::Cancelled,
        _ => BatchStatus::Pending,
    }
}
