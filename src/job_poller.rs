//! Submission and completion polling for vendor long-running generation jobs.
//!
//! A [`GenerationJob`] lives for exactly one remix attempt. The poll schedule
//! is fixed: one status query every [`POLL_INTERVAL`], at most [`MAX_POLLS`]
//! times, giving a hard ceiling of ten minutes per job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::time::{sleep, Duration, Instant};

use crate::error::{RemixError, Result};

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_POLLS: u32 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Polling,
    Completed,
    TimedOut,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::TimedOut | JobStatus::Failed)
    }

    fn can_become(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Submitted, Polling)
                | (Submitted, Failed)
                | (Polling, Polling)
                | (Polling, Completed)
                | (Polling, TimedOut)
                | (Polling, Failed)
        )
    }
}

/// One status query result.
#[derive(Clone, Debug, Default)]
pub struct PollResponse {
    pub done: bool,
    /// Vendor-reported failure message on a finished job.
    pub error: Option<String>,
    /// The raw status document, handed to the result resolver when done.
    pub payload: Value,
}

/// Vendor side of a long-running generation.
#[async_trait]
pub trait LongRunningJobApi: Send + Sync {
    /// Starts a job and returns its operation handle.
    async fn submit(&self, payload: &Value) -> anyhow::Result<String>;

    async fn poll(&self, handle: &str) -> anyhow::Result<PollResponse>;
}

#[derive(Clone, Debug)]
pub struct GenerationJob {
    handle: String,
    status: JobStatus,
    poll_count: u32,
    max_polls: u32,
    submitted_at: Instant,
}

impl GenerationJob {
    fn submitted(handle: String) -> Self {
        Self {
            handle,
            status: JobStatus::Submitted,
            poll_count: 0,
            max_polls: MAX_POLLS,
            submitted_at: Instant::now(),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count
    }

    pub fn max_polls(&self) -> u32 {
        self.max_polls
    }

    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    fn transition(&mut self, next: JobStatus) {
        debug_assert!(
            self.status.can_become(next),
            "invalid job transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }
}

#[derive(Clone)]
pub struct JobPoller {
    api: Arc<dyn LongRunningJobApi>,
}

impl JobPoller {
    pub fn new(api: Arc<dyn LongRunningJobApi>) -> Self {
        Self { api }
    }

    pub async fn submit(&self, payload: &Value) -> Result<GenerationJob> {
        let handle = self
            .api
            .submit(payload)
            .await
            .map_err(|err| RemixError::JobSubmission(format!("job submission: {err}")))?;
        let handle = handle.trim().to_string();
        if handle.is_empty() {
            return Err(RemixError::JobSubmission("vendor returned no operation handle".to_string()));
        }
        tracing::info!(operation = %handle, "generation job submitted");
        Ok(GenerationJob::submitted(handle))
    }

    /// Waits for `job` to finish and returns the completion payload.
    ///
    /// Transport errors on individual polls count as "not done yet", so a
    /// permanently broken status endpoint runs into the timeout.
    pub async fn poll_until_done(&self, job: &mut GenerationJob) -> Result<Value> {
        if job.status.is_terminal() {
            return Err(RemixError::JobSubmission(format!(
                "job {} already finished as {:?}",
                job.handle, job.status
            )));
        }
        job.transition(JobStatus::Polling);

        while job.poll_count < job.max_polls {
            sleep(POLL_INTERVAL).await;
            job.poll_count += 1;

            let response = match self.api.poll(&job.handle).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(
                        operation = %job.handle,
                        poll = job.poll_count,
                        error = %err,
                        "status check failed, will retry"
                    );
                    continue;
                }
            };

            tracing::debug!(
                operation = %job.handle,
                poll = job.poll_count,
                max_polls = job.max_polls,
                done = response.done,
                "polled generation job"
            );

            if !response.done {
                continue;
            }
            if let Some(message) = response.error {
                job.transition(JobStatus::Failed);
                tracing::error!(operation = %job.handle, %message, "generation job failed");
                return Err(RemixError::JobFailed { handle: job.handle.clone(), message });
            }
            job.transition(JobStatus::Completed);
            tracing::info!(
                operation = %job.handle,
                polls = job.poll_count,
                elapsed_secs = job.elapsed().as_secs(),
                "generation job completed"
            );
            return Ok(response.payload);
        }

        job.transition(JobStatus::TimedOut);
        tracing::error!(operation = %job.handle, polls = job.poll_count, "generation job timed out");
        Err(RemixError::JobTimeout { handle: job.handle.clone(), polls: job.poll_count })
    }

    /// Submits `payload` and waits for the result.
    pub async fn run(&self, payload: &Value) -> Result<(GenerationJob, Value)> {
        let mut job = self.submit(payload).await?;
        let result = self.poll_until_done(&mut job).await?;
        Ok((job, result))
    }
}
