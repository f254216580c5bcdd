//! Process execution
//!
//! The [`ProcessRunner`] trait is the only way the service starts external
//! programs (the simulator and the graph backend). Two implementations:
//! - [`DirectRunner`]: real child processes with timeout, signal-based
//!   termination and bounded output capture
//! - [`FakeRunner`]: scripted outcomes for deterministic tests, no processes

mod direct;
mod fake;

pub use direct::DirectRunner;
pub use fake::{FakeBehavior, FakeRunner};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::LaunchError;
use crate::execution::ProcessOutcome;

/// Everything needed to launch one process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory; the job workspace
    pub work_dir: PathBuf,
    /// Wall-clock limit measured from spawn
    pub timeout: Duration,
    /// Combined stdout+stderr bytes kept
    pub output_cap: usize,
    /// Time between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    /// Complete environment of the child; nothing else is inherited
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(300),
            output_cap: 1024 * 1024,
            kill_grace: Duration::from_secs(5),
            env: Vec::new(),
        }
    }

    /// Applies the limits and environment from the service configuration
    pub fn with_limits(mut self, config: &Config, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.output_cap = config.output_byte_cap;
        self.kill_grace = config.kill_grace;
        self.env = config.process_environment();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_cap(mut self, output_cap: usize) -> Self {
        self.output_cap = output_cap;
        self
    }

    pub fn kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    /// File name of the program, used for matching and logging
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

/// Capability to run an external program to completion
///
/// Implementations must honour `spec.timeout` and `cancel`: on either, the
/// process is terminated and the outcome reports `TimedOut` or `Canceled`
/// along with whatever output was captured. Exit codes are passed through
/// untouched.
///
/// The launch (or launch failure) happens during the first poll of the
/// returned future. The supervisor relies on this to launch jobs in
/// admission order.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        spec: ProcessSpec,
        cancel: CancellationToken,
    ) -> Result<ProcessOutcome, LaunchError>;
}
