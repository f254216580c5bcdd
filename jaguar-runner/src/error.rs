//! Error types for the simulation service
//!
//! One enum per component. Workspace, process and render errors never
//! leave the supervisor as errors: they are mapped onto a terminal job
//! state plus a recorded [`JobFailure`]. Callers only see [`ResultError`]
//! and [`SupervisorError`].

use jaguar_core::domain::job::{FailureKind, JobFailure, JobId, JobState};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration value
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Workspace could not be provisioned (`AllocationError`)
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Workspace count quota reached
    #[error("workspace quota exhausted ({limit} workspaces in use)")]
    QuotaExceeded { limit: usize },

    /// Not enough free space on the workspace filesystem
    #[error("insufficient free space: {available} bytes available, {required} required")]
    InsufficientSpace { available: u64, required: u64 },

    /// Not enough free inodes on the workspace filesystem
    #[error("insufficient free inodes: {available} available, {required} required")]
    InsufficientInodes { available: u64, required: u64 },

    /// The workspace path is already taken
    #[error("workspace already exists: {0}")]
    AlreadyExists(PathBuf),

    /// A path component would escape the workspace root
    #[error("rejected path component '{0}'")]
    InvalidComponent(String),

    /// Filesystem operation failed
    #[error("workspace I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying after a short pause may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. }
                | Self::InsufficientSpace { .. }
                | Self::InsufficientInodes { .. }
                | Self::Io { .. }
        )
    }
}

/// The executable could not be started (`LaunchError`)
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("executable not found: {0}")]
    NotFound(PathBuf),

    #[error("file is not executable: {0}")]
    NotExecutable(PathBuf),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Post-processing of simulator output failed (`RenderError`)
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("expected output file is missing: {0}")]
    MissingOutput(PathBuf),

    #[error("malformed output in {path}: {reason}")]
    MalformedOutput { path: PathBuf, reason: String },

    #[error("graph backend could not start: {0}")]
    BackendLaunch(#[from] LaunchError),

    #[error("graph backend exited with {status}: {stderr}")]
    BackendFailed { status: String, stderr: String },

    #[error("graph backend timed out")]
    BackendTimedOut,

    #[error("rendering was canceled")]
    Canceled,

    #[error("graph backend produced no output at {0}")]
    NoArtifact(PathBuf),

    #[error("render I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Error returned by `Supervisor::result`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id} is not finished (state: {state})")]
    NotReady { id: JobId, state: JobState },

    #[error("simulator exited with nonzero code {code:?}: {cause}")]
    NonZeroExit { code: Option<i32>, cause: String },

    #[error("simulator timed out")]
    TimedOut,

    #[error("job was canceled")]
    Canceled,

    #[error("simulator could not be launched: {0}")]
    Launch(String),

    #[error("workspace allocation failed: {0}")]
    Allocation(String),

    #[error("rendering failed: {0}")]
    Render(String),

    /// Succeeded with rendering disabled
    #[error("job {0} finished without an artifact")]
    NoArtifact(JobId),
}

impl ResultError {
    /// Maps a terminal job's recorded failure onto the caller-facing error
    pub fn from_failure(failure: &JobFailure, exit_code: Option<i32>) -> Self {
        match failure.kind {
            FailureKind::NonZeroExit => Self::NonZeroExit {
                code: exit_code,
                cause: failure.cause(),
            },
            FailureKind::TimedOut => Self::TimedOut,
            FailureKind::Canceled => Self::Canceled,
            FailureKind::Launch => Self::Launch(failure.cause()),
            FailureKind::Allocation => Self::Allocation(failure.cause()),
            FailureKind::Render => Self::Render(failure.cause()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

/// Error returned by supervisor operations other than `result`
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("job {id} cannot be re-rendered in state {state}")]
    NotRenderable { id: JobId, state: JobState },

    #[error("job {0} has no workspace to render from")]
    WorkspaceGone(JobId),

    #[error(transparent)]
    Render(#[from] RenderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_allocation_errors() {
        assert!(WorkspaceError::QuotaExceeded { limit: 1 }.is_transient());
        assert!(
            WorkspaceError::InsufficientSpace {
                available: 0,
                required: 1
            }
            .is_transient()
        );
        assert!(!WorkspaceError::AlreadyExists(PathBuf::from("/tmp/x")).is_transient());
        assert!(!WorkspaceError::InvalidComponent("..".to_string()).is_transient());
    }

    #[test]
    fn test_result_error_from_failure() {
        let failure = JobFailure::new(FailureKind::NonZeroExit, "exit code 1");
        assert!(matches!(
            ResultError::from_failure(&failure, Some(1)),
            ResultError::NonZeroExit { code: Some(1), .. }
        ));

        let failure = JobFailure::new(FailureKind::TimedOut, "limit 1s");
        assert_eq!(
            ResultError::from_failure(&failure, None),
            ResultError::TimedOut
        );
    }
}
