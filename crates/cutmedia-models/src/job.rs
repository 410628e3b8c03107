//! Job definitions and the job state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::JobParameters;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a client-supplied ID.
    ///
    /// Only ASCII alphanumerics and hyphens, 8-64 chars. The ID ends up in
    /// file names, so anything else is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        if is_well_formed(s) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_well_formed(id: &str) -> bool {
    if id.len() < 8 || id.len() > 64 {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Input persisted, worker not started yet
    #[default]
    Queued,
    /// Worker process is alive
    Running,
    /// Worker exited 0 and the output file exists
    #[serde(alias = "completed")]
    Done,
    /// Spawn failure, worker failure, timeout or cancellation
    #[serde(alias = "failed")]
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One user-submitted video processing request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Current status
    pub status: JobStatus,

    /// Parameters forwarded to the worker
    pub parameters: JobParameters,

    /// Original upload file name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Size of the persisted input in bytes
    pub input_size: u64,

    /// Human-readable stage
    pub stage: String,

    /// Coarse progress (0-100)
    pub progress: u8,

    /// Failure reason (only when status is error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Worker exit code, when the worker exited on its own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Worker spawn timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal transition timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a queued job. Called once the input is on disk.
    pub fn new(id: JobId, parameters: JobParameters) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            parameters,
            file_name: None,
            input_size: 0,
            stage: "Upload received".to_string(),
            progress: 0,
            error: None,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the original upload name.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Set the persisted input size.
    pub fn with_input_size(mut self, input_size: u64) -> Self {
        self.input_size = input_size;
        self
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the output artifact may be downloaded.
    pub fn output_ready(&self) -> bool {
        self.status == JobStatus::Done
    }

    /// queued -> running
    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.check(JobStatus::Running, &[JobStatus::Queued])?;
        self.status = JobStatus::Running;
        self.stage = "Running worker".to_string();
        self.progress = 10;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> done
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.check(JobStatus::Done, &[JobStatus::Running])?;
        self.status = JobStatus::Done;
        self.stage = "Processing complete".to_string();
        self.progress = 100;
        self.exit_code = Some(0);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// queued|running -> error
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.check(JobStatus::Error, &[JobStatus::Queued, JobStatus::Running])?;
        self.status = JobStatus::Error;
        self.stage = "Processing failed".to_string();
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Update the stage string without changing status.
    pub fn set_stage(&mut self, stage: impl Into<String>, progress: u8) {
        if self.is_terminal() {
            return;
        }
        self.stage = stage.into();
        self.progress = progress.min(99);
    }

    fn check(&self, to: JobStatus, allowed_from: &[JobStatus]) -> Result<(), TransitionError> {
        if allowed_from.contains(&self.status) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }
}
