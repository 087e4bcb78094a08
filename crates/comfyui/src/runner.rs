//! Submit-and-poll job execution.
//!
//! [`JobRunner::run`] posts a graph to `/prompt`, then polls
//! `/history/{prompt_id}` with exponential backoff until the record
//! appears, the backend reports a failure, or the attempt budget runs
//! out:
//!
//! ```text
//! Submitted -> Polling { attempt } -> Completed | Failed | TimedOut
//! ```
//!
//! Every wait is an `.await`, so a long poll never stalls other tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use comfymcp_core::error::CoreError;
use comfymcp_core::graph::Graph;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api::{view_url, ComfyUIApiError};
use crate::backend::ComfyBackend;
use crate::history::HistoryEntry;

/// Tunable parameters for the poll backoff.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Wait after the first unsuccessful poll.
    pub initial_delay: Duration,
    /// Number of history queries before giving up.
    pub max_attempts: u32,
    /// Factor by which the wait grows after each poll. Uncapped.
    pub multiplier: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_attempts: 8,
            multiplier: 2.0,
        }
    }
}

impl PollConfig {
    /// The waits the poll loop performs when the job never completes.
    ///
    /// With the defaults: 1, 2, 4, ... 128 seconds (255 s total).
    pub fn nominal_schedule(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_attempts as usize);
        let mut delay = self.initial_delay;
        for _ in 0..self.max_attempts {
            delays.push(delay);
            delay = next_delay(delay, self);
        }
        delays
    }
}

/// Calculate the next backoff delay from the current delay and config.
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms)
}

/// Lifecycle state of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Polling { attempt: u32 },
    Completed,
    TimedOut,
    Failed,
}

/// Backend job being tracked by the poll loop.
#[derive(Debug, Clone)]
pub struct JobHandle {
    /// Backend-assigned job identifier.
    pub prompt_id: String,
    /// Client ID sent with the submission.
    pub client_id: String,
    /// Wall-clock submission time.
    pub submitted_at: DateTime<Utc>,
    /// Monotonic submission instant, used for elapsed-time reporting.
    pub started: Instant,
    /// History queries made so far.
    pub attempts: u32,
    pub state: JobState,
}

impl JobHandle {
    fn new(prompt_id: String, client_id: String) -> Self {
        Self {
            prompt_id,
            client_id,
            submitted_at: Utc::now(),
            started: Instant::now(),
            attempts: 0,
            state: JobState::Submitted,
        }
    }

    /// Seconds since submission, measured, not summed from the schedule.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn transition(&mut self, state: JobState) {
        tracing::debug!(
            prompt_id = %self.prompt_id,
            from = ?self.state,
            to = ?state,
            "Job state transition",
        );
        self.state = state;
    }
}

/// Reference to the image a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputArtifact {
    /// Node that produced the image.
    pub node_id: String,
    pub filename: String,
    /// Retrieval URL on the backend.
    pub url: String,
}

/// Errors that end a job run.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Template or parameter problem detected before submission.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The backend rejected the submission or answered with garbage.
    #[error("Failed to queue workflow: {0}")]
    BackendSubmission(String),

    /// The backend could not be reached, or a poll response was malformed.
    #[error("ComfyUI API error: {0}")]
    BackendCommunication(String),

    /// The job finished but no output node carried images.
    #[error("No output node with images found for prompt {0}")]
    NoOutputProduced(String),

    /// The backend reported that execution failed.
    #[error("Workflow execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Workflow did not complete within {elapsed_secs:.1} seconds")]
    PollingTimeout { elapsed_secs: f64 },

    /// The caller went away before the job finished.
    #[error("Job cancelled")]
    Cancelled,
}

/// Result of a single history query.
enum PollOutcome {
    Pending,
    Done(HistoryEntry),
}

/// Submits graphs and polls them to completion.
pub struct JobRunner<B: ComfyBackend + ?Sized> {
    backend: Arc<B>,
    config: PollConfig,
}

impl<B: ComfyBackend + ?Sized> JobRunner<B> {
    pub fn new(backend: Arc<B>, config: PollConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Submit `graph` and wait for its first output image.
    pub async fn run(&self, graph: &Graph) -> Result<OutputArtifact, JobError> {
        self.run_cancellable(graph, &CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), but aborts the poll loop when `cancel`
    /// fires. The backend job itself keeps running.
    pub async fn run_cancellable(
        &self,
        graph: &Graph,
        cancel: &CancellationToken,
    ) -> Result<OutputArtifact, JobError> {
        let mut handle = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            result = self.submit(graph) => result?,
        };
        self.poll(&mut handle, cancel).await
    }

    /// Queue `graph` on the backend.
    pub async fn submit(&self, graph: &Graph) -> Result<JobHandle, JobError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .backend
            .submit(&graph.to_value(), &client_id)
            .await
            .map_err(classify_submit_error)?;

        if response.prompt_id.is_empty() {
            return Err(JobError::BackendSubmission(
                "response did not contain a prompt_id".to_string(),
            ));
        }

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Queued workflow",
        );
        Ok(JobHandle::new(response.prompt_id, client_id))
    }

    /// Poll a submitted job until it reaches a terminal state.
    pub async fn poll(
        &self,
        handle: &mut JobHandle,
        cancel: &CancellationToken,
    ) -> Result<OutputArtifact, JobError> {
        let mut delay = self.config.initial_delay;

        while handle.attempts < self.config.max_attempts {
            handle.attempts += 1;
            handle.transition(JobState::Polling {
                attempt: handle.attempts,
            });

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancelled(handle)),
                outcome = self.query(handle) => outcome,
            };

            match outcome {
                Ok(PollOutcome::Done(entry)) => return self.finish(handle, &entry),
                Ok(PollOutcome::Pending) => {}
                Err(e) => {
                    handle.transition(JobState::Failed);
                    return Err(e);
                }
            }

            tracing::debug!(
                prompt_id = %handle.prompt_id,
                attempt = handle.attempts,
                delay_ms = delay.as_millis() as u64,
                "Job not finished yet",
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancelled(handle)),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, &self.config);
        }

        handle.transition(JobState::TimedOut);
        let elapsed_secs = handle.elapsed_secs();
        tracing::warn!(
            prompt_id = %handle.prompt_id,
            attempts = handle.attempts,
            elapsed_secs,
            "Workflow did not complete in time",
        );
        Err(JobError::PollingTimeout { elapsed_secs })
    }

    // ---- private helpers ----

    async fn query(&self, handle: &JobHandle) -> Result<PollOutcome, JobError> {
        let mut history = self
            .backend
            .history(&handle.prompt_id)
            .await
            .map_err(|e| JobError::BackendCommunication(e.to_string()))?;

        Ok(match history.swap_remove(&handle.prompt_id) {
            Some(entry) => PollOutcome::Done(entry),
            None => PollOutcome::Pending,
        })
    }

    fn finish(
        &self,
        handle: &mut JobHandle,
        entry: &HistoryEntry,
    ) -> Result<OutputArtifact, JobError> {
        if entry.is_error() {
            handle.transition(JobState::Failed);
            let reason = entry
                .error_message()
                .unwrap_or_else(|| "backend reported an error".to_string());
            tracing::error!(prompt_id = %handle.prompt_id, reason = %reason, "Workflow failed");
            return Err(JobError::ExecutionFailed(reason));
        }

        let Some(image) = entry.first_image() else {
            handle.transition(JobState::Failed);
            tracing::error!(
                prompt_id = %handle.prompt_id,
                outputs = ?entry.outputs,
                "No output node with images",
            );
            return Err(JobError::NoOutputProduced(handle.prompt_id.clone()));
        };

        handle.transition(JobState::Completed);
        let artifact = OutputArtifact {
            url: view_url(self.backend.base_url(), &image.filename),
            node_id: image.node_id,
            filename: image.filename,
        };
        tracing::info!(
            prompt_id = %handle.prompt_id,
            node_id = %artifact.node_id,
            url = %artifact.url,
            elapsed_secs = handle.elapsed_secs(),
            "Generated image",
        );
        Ok(artifact)
    }

    fn cancelled(&self, handle: &JobHandle) -> JobError {
        tracing::info!(
            prompt_id = %handle.prompt_id,
            attempts = handle.attempts,
            "Polling cancelled; backend job left running",
        );
        JobError::Cancelled
    }
}

/// Map a submission failure onto the error taxonomy.
///
/// Rejections and unreadable bodies are submission errors; failing to
/// reach the backend at all is a communication error.
fn classify_submit_error(error: ComfyUIApiError) -> JobError {
    match error {
        ComfyUIApiError::Request(e) => JobError::BackendCommunication(e.to_string()),
        ComfyUIApiError::ApiError { status, body } => {
            JobError::BackendSubmission(format!("{status} - {body}"))
        }
        ComfyUIApiError::Decode(e) => JobError::BackendSubmission(format!("malformed response: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles_without_cap() {
        let config = PollConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
        assert_eq!(
            next_delay(Duration::from_secs(256), &config),
            Duration::from_secs(512)
        );
    }

    #[test]
    fn custom_multiplier() {
        let config = PollConfig {
            multiplier: 3.0,
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(2), &config), Duration::from_secs(6));
    }

    #[test]
    fn default_schedule_sums_to_255_seconds() {
        let schedule = PollConfig::default().nominal_schedule();
        let secs: Vec<u64> = schedule.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 64, 128]);
        assert_eq!(schedule.iter().sum::<Duration>(), Duration::from_secs(255));
    }

    #[test]
    fn classifies_submit_errors() {
        let rejected = classify_submit_error(ComfyUIApiError::ApiError {
            status: 400,
            body: "invalid prompt".into(),
        });
        assert!(matches!(rejected, JobError::BackendSubmission(msg) if msg == "400 - invalid prompt"));

        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(
            classify_submit_error(ComfyUIApiError::Decode(decode)),
            JobError::BackendSubmission(_)
        ));
    }

    #[test]
    fn timeout_message_reports_elapsed() {
        let err = JobError::PollingTimeout { elapsed_secs: 255.34 };
        assert_eq!(err.to_string(), "Workflow did not complete within 255.3 seconds");
    }
}
