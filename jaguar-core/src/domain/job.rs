//! Job domain types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::artifact::{Artifact, RenderFormat};
use crate::domain::log::{LogEntry, LogLevel};

/// Opaque, unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Simulation request submitted by a caller
///
/// `system_text` is written verbatim into the job workspace as the
/// simulator's input file; its contents are opaque to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub system_text: String,
    /// Overrides the configured render format; `None` uses the default
    pub render: Option<RenderFormat>,
    /// Skips rendering entirely when `false`
    #[serde(default = "default_true")]
    pub render_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl SimulationRequest {
    pub fn new(system_text: impl Into<String>) -> Self {
        Self {
            system_text: system_text.into(),
            render: None,
            render_enabled: true,
        }
    }

    pub fn with_format(mut self, format: RenderFormat) -> Self {
        self.render = Some(format);
        self
    }

    pub fn without_render(mut self) -> Self {
        self.render_enabled = false;
        self
    }
}

/// Job lifecycle state
///
/// `Queued -> Running -> {Succeeded, Failed, TimedOut, Canceled}`, with the
/// shortcuts `Queued -> Failed` (workspace allocation) and
/// `Queued -> Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Canceled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            JobState::Queued => matches!(
                next,
                JobState::Running | JobState::Failed | JobState::Canceled
            ),
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "Queued"),
            JobState::Running => write!(f, "Running"),
            JobState::Succeeded => write!(f, "Succeeded"),
            JobState::Failed => write!(f, "Failed"),
            JobState::TimedOut => write!(f, "TimedOut"),
            JobState::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Category of a job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Workspace could not be provisioned
    Allocation,
    /// Simulator missing, not executable, or spawn failed
    Launch,
    /// Wall-clock limit exceeded
    TimedOut,
    /// Simulator ran and exited with a nonzero code
    NonZeroExit,
    /// Post-processing of the simulator output failed
    Render,
    /// Explicit cancellation
    Canceled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Allocation => write!(f, "AllocationError"),
            FailureKind::Launch => write!(f, "LaunchError"),
            FailureKind::TimedOut => write!(f, "TimedOut"),
            FailureKind::NonZeroExit => write!(f, "NonZeroExit"),
            FailureKind::Render => write!(f, "RenderError"),
            FailureKind::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Failure recorded on a terminal job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    /// Full detail; may be long
    pub message: String,
}

impl JobFailure {
    /// Longest cause string placed in a status payload
    pub const CAUSE_LIMIT: usize = 160;

    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Short, single-line, human readable cause
    pub fn cause(&self) -> String {
        let first_line = self.message.lines().next().unwrap_or("").trim();
        let mut cause = format!("{}: {}", self.kind, first_line);
        if cause.len() > Self::CAUSE_LIMIT {
            let mut cut = Self::CAUSE_LIMIT;
            while !cause.is_char_boundary(cut) {
                cut -= 1;
            }
            cause.truncate(cut);
            cause.push('…');
        }
        cause
    }
}

/// Bounded stdout/stderr captured from the simulator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Set when output beyond the byte cap was dropped
    pub truncated: bool,
}

/// Everything recorded when a job reaches a terminal state
#[derive(Debug, Clone, Default)]
pub struct JobCompletion {
    pub exit_code: Option<i32>,
    pub output: CapturedOutput,
    pub artifact: Option<Artifact>,
    /// Best-effort rendering of a failed run, never returned as a result
    pub partial_artifact: Option<Artifact>,
    pub failure: Option<JobFailure>,
}

impl JobCompletion {
    pub fn failed(failure: JobFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// Job execution record
///
/// Owned exclusively by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: SimulationRequest,
    pub state: JobState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub exit_code: Option<i32>,
    pub output: CapturedOutput,
    pub workspace: Option<PathBuf>,
    pub artifact: Option<Artifact>,
    pub partial_artifact: Option<Artifact>,
    pub failure: Option<JobFailure>,
    pub events: Vec<LogEntry>,
}

impl Job {
    /// Creates a new queued job
    pub fn new(request: SimulationRequest) -> Self {
        let mut job = Self {
            id: JobId::new(),
            request,
            state: JobState::Queued,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            output: CapturedOutput::default(),
            workspace: None,
            artifact: None,
            partial_artifact: None,
            failure: None,
            events: Vec::new(),
        };
        job.log(LogLevel::Info, "Job queued");
        job
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Records a lifecycle event
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.events.push(LogEntry::now(level, message));
    }

    /// Records where the job's files live; allowed while the job is live
    pub fn attach_workspace(&mut self, workspace: PathBuf) {
        if !self.is_terminal() {
            self.workspace = Some(workspace);
        }
    }

    /// Moves a queued job to `Running`
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.check(JobState::Running)?;
        self.state = JobState::Running;
        self.started_at = Some(chrono::Utc::now());
        self.log(LogLevel::Info, "Job running");
        Ok(())
    }

    /// Moves the job to a terminal state, recording its results
    ///
    /// Exit code, output and artifacts are only ever written here, so they
    /// exist on terminal jobs only.
    pub fn finish(
        &mut self,
        state: JobState,
        completion: JobCompletion,
    ) -> Result<(), TransitionError> {
        if !state.is_terminal() {
            return Err(TransitionError {
                from: self.state,
                to: state,
            });
        }
        self.check(state)?;

        self.state = state;
        self.finished_at = Some(chrono::Utc::now());
        self.exit_code = completion.exit_code;
        self.output = completion.output;
        self.artifact = completion.artifact;
        self.partial_artifact = completion.partial_artifact;
        self.failure = completion.failure;

        let level = if state == JobState::Succeeded {
            LogLevel::Info
        } else {
            LogLevel::Warning
        };
        match &self.failure {
            Some(failure) => self.log(level, format!("Job {}: {}", state, failure.cause())),
            None => self.log(level, format!("Job {}", state)),
        }
        Ok(())
    }

    /// Keeps output produced by a process that was canceled mid-run
    ///
    /// Only diagnostics see it; the job never gets an artifact.
    pub fn record_canceled_output(&mut self, output: CapturedOutput, exit_code: Option<i32>) {
        if self.state == JobState::Canceled && self.output == CapturedOutput::default() {
            self.output = output;
            self.exit_code = exit_code;
        }
    }

    /// Swaps in a regenerated artifact
    ///
    /// Only succeeded jobs carry an artifact, so this is refused otherwise.
    pub fn replace_artifact(&mut self, artifact: Artifact) -> bool {
        if self.state != JobState::Succeeded {
            return false;
        }
        self.artifact = Some(artifact);
        self.log(LogLevel::Info, "Artifact regenerated");
        true
    }

    fn check(&self, next: JobState) -> Result<(), TransitionError> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.state,
                to: next,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued() -> Job {
        Job::new(SimulationRequest::new("x1 = x2\n"))
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = queued();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.started_at.is_none());
        assert!(job.exit_code.is_none());
        assert_eq!(job.events.len(), 1);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = queued();
        job.start().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());

        job.finish(
            JobState::Succeeded,
            JobCompletion {
                exit_code: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.exit_code, Some(0));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = queued();
        job.finish(
            JobState::Canceled,
            JobCompletion::failed(JobFailure::new(FailureKind::Canceled, "canceled")),
        )
        .unwrap();

        let err = job
            .finish(JobState::Failed, JobCompletion::default())
            .unwrap_err();
        assert_eq!(err.from, JobState::Canceled);
        assert_eq!(err.to, JobState::Failed);
        assert!(job.start().is_err());
        assert_eq!(job.state, JobState::Canceled);
    }

    #[test]
    fn test_queued_cannot_succeed_or_time_out_directly() {
        let mut job = queued();
        assert!(job.finish(JobState::Succeeded, JobCompletion::default()).is_err());
        assert!(job.finish(JobState::TimedOut, JobCompletion::default()).is_err());
        assert!(job.finish(JobState::Running, JobCompletion::default()).is_err());
        assert_eq!(job.state, JobState::Queued);
    }

    #[test]
    fn test_running_is_not_revisited() {
        let mut job = queued();
        job.start().unwrap();
        assert!(job.start().is_err());
    }

    #[test]
    fn test_canceled_output_is_recorded_once() {
        let mut job = queued();
        job.start().unwrap();
        job.finish(
            JobState::Canceled,
            JobCompletion::failed(JobFailure::new(FailureKind::Canceled, "canceled")),
        )
        .unwrap();

        let output = CapturedOutput {
            stdout: "partial".to_string(),
            ..Default::default()
        };
        job.record_canceled_output(output.clone(), Some(143));
        job.record_canceled_output(CapturedOutput::default(), None);
        assert_eq!(job.output, output);
        assert!(job.artifact.is_none());
    }

    #[test]
    fn test_failure_cause_is_short_and_single_line() {
        let failure = JobFailure::new(
            FailureKind::NonZeroExit,
            format!("exit code 1\n{}", "x".repeat(1000)),
        );
        assert_eq!(failure.cause(), "NonZeroExit: exit code 1");

        let long = JobFailure::new(FailureKind::Render, "é".repeat(400));
        assert!(long.cause().len() <= JobFailure::CAUSE_LIMIT + '…'.len_utf8());
    }

    #[test]
    fn test_artifact_only_replaced_on_success() {
        let artifact = Artifact {
            job_id: JobId::new(),
            format: RenderFormat::Dot,
            primary: PathBuf::from("render-1/statespace.dot"),
            attachments: Vec::new(),
            partial: false,
            created_at: chrono::Utc::now(),
        };

        let mut job = queued();
        assert!(!job.replace_artifact(artifact.clone()));

        job.start().unwrap();
        job.finish(JobState::Succeeded, JobCompletion::default())
            .unwrap();
        assert!(job.replace_artifact(artifact.clone()));
        assert_eq!(job.artifact, Some(artifact));
    }

    #[test]
    fn test_job_id_round_trips_through_string() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
