//! Execution types for the simulation service
//!
//! These types only exist at runtime while a process is being supervised.
//! The supervisor folds them into the job record once the process is gone.

use jaguar_core::domain::job::{CapturedOutput, FailureKind, JobFailure, JobState};
use std::time::Duration;

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process exited on its own with this code
    Exited(i32),
    /// Process was killed by a signal it did not get from us
    Signaled(i32),
    /// Wall-clock limit elapsed and the process was terminated
    TimedOut,
    /// Cancellation was requested and the process was terminated
    Canceled,
}

/// Result of one process run
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub termination: Termination,
    pub output: CapturedOutput,
    pub duration: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }

    /// Exit code passed through verbatim, when the process exited normally
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Terminal job state this outcome leads to, before rendering
    pub fn job_state(&self) -> JobState {
        match self.termination {
            Termination::Exited(0) => JobState::Succeeded,
            Termination::Exited(_) | Termination::Signaled(_) => JobState::Failed,
            Termination::TimedOut => JobState::TimedOut,
            Termination::Canceled => JobState::Canceled,
        }
    }

    /// Failure record for an unsuccessful outcome
    pub fn failure(&self, timeout: Duration) -> Option<JobFailure> {
        match self.termination {
            Termination::Exited(0) => None,
            Termination::Exited(code) => Some(JobFailure::new(
                FailureKind::NonZeroExit,
                with_stderr_tail(format!("simulator exited with code {}", code), &self.output),
            )),
            Termination::Signaled(signal) => Some(JobFailure::new(
                FailureKind::NonZeroExit,
                with_stderr_tail(
                    format!("simulator was killed by signal {}", signal),
                    &self.output,
                ),
            )),
            Termination::TimedOut => Some(JobFailure::new(
                FailureKind::TimedOut,
                format!("simulator exceeded the {:?} time limit", timeout),
            )),
            Termination::Canceled => Some(JobFailure::new(
                FailureKind::Canceled,
                "job canceled while running",
            )),
        }
    }
}

/// Appends the last stderr line (if any) as detail on a new line
fn with_stderr_tail(summary: String, output: &CapturedOutput) -> String {
    match output.stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(line) => format!("{}\n{}", summary, line.trim()),
        None => summary,
    }
}
