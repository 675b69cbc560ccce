//! Batch job lifecycle.
//!
//! Upload the JSONL input, submit a job against it, poll at a fixed interval
//! until the service reports a terminal status, then download and correlate
//! the output. Job state is owned by the service; the runner only observes it.

use crate::batch::{
    BatchOutcome, BatchRequestEntry, CHAT_COMPLETIONS_URL, build_requests, correlate,
    parse_output, to_jsonl,
};
use crate::client::{AzureOpenAIClient, FileObject};
use crate::models::{AzChatError, AzureApiError, BatchConfig, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Purpose tag for batch input uploads.
pub const BATCH_PURPOSE: &str = "batch";

/// Job status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validating,
    Failed,
    InProgress,
    Finalizing,
    Completed,
    Expired,
    Cancelling,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl BatchStatus {
    /// No further transitions happen from these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Cancelled
                | BatchStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Validating => "validating",
            BatchStatus::Failed => "failed",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job request tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

/// A batch job as returned by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub input_file_id: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
}

impl BatchJob {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Output file id, ignoring empty strings.
    pub fn output_file(&self) -> Option<&str> {
        self.output_file_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Body of `POST /openai/batches`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateBatchRequest {
    pub input_file_id: String,
    /// Target path every line is sent to
    pub endpoint: String,
    pub completion_window: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_expires_after: Option<OutputExpiresAfter>,
}

/// Output file retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputExpiresAfter {
    pub seconds: u64,
    pub anchor: String,
}

impl OutputExpiresAfter {
    /// Retention counted from job creation.
    pub fn from_creation(seconds: u64) -> Self {
        Self {
            seconds,
            anchor: "created_at".to_string(),
        }
    }
}

/// Remote operations the runner needs.
#[async_trait]
pub trait BatchApi: Send + Sync {
    async fn upload_file(&self, filename: &str, bytes: Vec<u8>, purpose: &str)
    -> Result<FileObject>;
    async fn create_batch(&self, request: &CreateBatchRequest) -> Result<BatchJob>;
    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob>;
    async fn file_content(&self, file_id: &str) -> Result<String>;
}

#[async_trait]
impl BatchApi for AzureOpenAIClient {
    async fn upload_file(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        purpose: &str,
    ) -> Result<FileObject> {
        AzureOpenAIClient::upload_file(self, filename, bytes, purpose).await
    }

    async fn create_batch(&self, request: &CreateBatchRequest) -> Result<BatchJob> {
        AzureOpenAIClient::create_batch(self, request).await
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob> {
        AzureOpenAIClient::retrieve_batch(self, batch_id).await
    }

    async fn file_content(&self, file_id: &str) -> Result<String> {
        AzureOpenAIClient::file_content(self, file_id).await
    }
}

/// Outcome of a full batch workflow.
#[derive(Debug, Clone)]
pub struct BatchRun {
    /// Job in its terminal state
    pub job: BatchJob,
    /// `None` when the job produced no output file
    pub outcomes: Option<Vec<BatchOutcome>>,
}

/// Drives batch jobs end to end.
pub struct BatchJobRunner {
    api: Arc<dyn BatchApi>,
    config: BatchConfig,
    poll_interval: Duration,
}

impl BatchJobRunner {
    pub fn new(api: Arc<dyn BatchApi>, config: BatchConfig) -> Self {
        let poll_interval = Duration::from_secs(config.poll_interval_secs);
        Self {
            api,
            config,
            poll_interval,
        }
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upload the entries and submit a job for them.
    pub async fn submit(&self, entries: &[BatchRequestEntry]) -> Result<BatchJob> {
        if entries.is_empty() {
            return Err(AzChatError::InvalidInput(
                "batch has no requests to submit".to_string(),
            ));
        }

        let jsonl = to_jsonl(entries)?;
        let filename = format!("azchat-batch-{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S"));

        let file = self
            .api
            .upload_file(&filename, jsonl.into_bytes(), BATCH_PURPOSE)
            .await?;
        if file.id.is_empty() {
            return Err(AzureApiError::InvalidResponse("upload returned no file id".into()).into());
        }
        info!(file_id = %file.id, requests = entries.len(), "Uploaded batch input");

        let request = CreateBatchRequest {
            input_file_id: file.id,
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
            completion_window: self.config.completion_window.clone(),
            output_expires_after: self
                .config
                .output_expires_after_secs
                .map(OutputExpiresAfter::from_creation),
        };

        let job = self.api.create_batch(&request).await?;
        if job.id.is_empty() {
            return Err(AzureApiError::InvalidResponse("batch returned no job id".into()).into());
        }
        info!(batch_id = %job.id, status = %job.status, "Submitted batch job");
        Ok(job)
    }

    /// Poll until the job reaches a terminal status.
    ///
    /// `on_poll` sees every refreshed job. There is no attempt limit.
    pub async fn wait<F>(&self, mut job: BatchJob, mut on_poll: F) -> Result<BatchJob>
    where
        F: FnMut(&BatchJob),
    {
        while !job.status.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;
            job = self.api.retrieve_batch(&job.id).await?;
            debug!(batch_id = %job.id, status = %job.status, "Polled batch job");
            on_poll(&job);
        }

        info!(batch_id = %job.id, status = %job.status, "Batch job finished");
        Ok(job)
    }

    /// Download and parse the job's output, if it has any.
    pub async fn collect(&self, job: &BatchJob) -> Result<Option<HashMap<String, String>>> {
        let Some(file_id) = job.output_file() else {
            warn!(batch_id = %job.id, status = %job.status, "Batch job has no output file");
            return Ok(None);
        };

        let text = self.api.file_content(file_id).await?;
        let replies = parse_output(&text);
        info!(batch_id = %job.id, results = replies.len(), "Downloaded batch output");
        Ok(Some(replies))
    }

    /// Build, submit, wait for and correlate a batch of prompts.
    pub async fn run<S, F>(
        &self,
        deployment: &str,
        prompts: &[S],
        system_prompt: Option<&str>,
        on_poll: F,
    ) -> Result<BatchRun>
    where
        S: AsRef<str>,
        F: FnMut(&BatchJob),
    {
        if deployment.trim().is_empty() {
            return Err(AzChatError::InvalidInput("batch deployment is empty".into()));
        }

        let entries = build_requests(deployment, prompts, system_prompt);
        let job = self.submit(&entries).await?;
        let job = self.wait(job, on_poll).await?;

        let outcomes = self
            .collect(&job)
            .await?
            .map(|replies| correlate(prompts, &replies));

        Ok(BatchRun { job, outcomes })
    }
}
