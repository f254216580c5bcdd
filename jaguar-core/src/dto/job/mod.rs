//! Job DTOs for the service boundary

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::artifact::Artifact;
use crate::domain::job::{Job, JobFailure, JobId, JobState};
use crate::domain::log::LogEntry;

/// Primary status payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub state: JobState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub exit_code: Option<i32>,
    /// Short cause for failed jobs
    pub cause: Option<String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            state: job.state,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            exit_code: job.exit_code,
            cause: job.failure.as_ref().map(JobFailure::cause),
        }
    }
}

/// Detailed view with captured output and lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDiagnostics {
    pub id: JobId,
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
    pub failure: Option<JobFailure>,
    pub workspace: Option<PathBuf>,
    pub partial_artifact: Option<Artifact>,
    pub events: Vec<LogEntry>,
}

impl From<&Job> for JobDiagnostics {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            state: job.state,
            exit_code: job.exit_code,
            stdout: job.output.stdout.clone(),
            stderr: job.output.stderr.clone(),
            truncated: job.output.truncated,
            failure: job.failure.clone(),
            workspace: job.workspace.clone(),
            partial_artifact: job.partial_artifact.clone(),
            events: job.events.clone(),
        }
    }
}
