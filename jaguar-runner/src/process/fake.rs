//! Fake process execution for tests
//!
//! Simulates exit codes, delays, written files and launch failures without
//! spawning anything. Timeouts and cancellation follow the same rules as
//! the direct runner, so supervisor tests exercise the real state machine.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::{ProcessRunner, ProcessSpec};
use crate::error::LaunchError;
use crate::execution::{ProcessOutcome, Termination};
use crate::service::{OutputBuffer, Stream};

/// Scripted behaviour of one fake process
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Exit with `code` after `delay`, writing `files` into the work dir first
    Exit {
        code: i32,
        delay: Duration,
        stdout: String,
        stderr: String,
        files: Vec<(String, String)>,
    },
    /// Never exit; only a timeout or cancellation ends it
    Hang,
    /// Fail to start
    LaunchFailure,
    /// Act like the graph backend: write the file named after `-o`
    RenderGraph,
}

impl FakeBehavior {
    pub fn exit(code: i32) -> Self {
        Self::Exit {
            code,
            delay: Duration::ZERO,
            stdout: String::new(),
            stderr: String::new(),
            files: Vec::new(),
        }
    }

    /// A successful simulator run producing the usual output files for `stem`
    pub fn simulation(stem: &str) -> Self {
        Self::exit(0)
            .with_stdout("simulation complete\n")
            .with_file(
                format!("{}-statespace.dot", stem),
                "digraph statespace {\n  \"1 1\" -> \"0 0\";\n  \"0 1\" -> \"1 0\";\n  \"0 0\" -> \"0 0\";\n  \"1 0\" -> \"1 1\";\n}\n",
            )
            .with_file(format!("{}-limitcycles.txt", stem), "cycle 1: 00\n")
    }

    pub fn with_delay(mut self, value: Duration) -> Self {
        if let Self::Exit { delay, .. } = &mut self {
            *delay = value;
        }
        self
    }

    pub fn with_stdout(mut self, value: impl Into<String>) -> Self {
        if let Self::Exit { stdout, .. } = &mut self {
            *stdout = value.into();
        }
        self
    }

    pub fn with_stderr(mut self, value: impl Into<String>) -> Self {
        if let Self::Exit { stderr, .. } = &mut self {
            *stderr = value.into();
        }
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        if let Self::Exit { files, .. } = &mut self {
            files.push((name.into(), contents.into()));
        }
        self
    }
}

type Handler = dyn Fn(&ProcessSpec) -> FakeBehavior + Send + Sync;

/// Test double for [`ProcessRunner`]
///
/// A handler picks the behaviour for each call, so one fake can stand in
/// for both the simulator and the graph backend.
#[derive(Clone)]
pub struct FakeRunner {
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<ProcessSpec>>>,
    running: Arc<AtomicUsize>,
    peak_running: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ProcessSpec) -> FakeBehavior + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            calls: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Simulator calls get `behavior`; calls to `dot` render a stub graph
    pub fn simulator(behavior: FakeBehavior) -> Self {
        Self::new(move |spec| {
            if spec.program_name() == "dot" {
                FakeBehavior::RenderGraph
            } else {
                behavior.clone()
            }
        })
    }

    /// Every call recorded so far, in call order
    pub fn calls(&self) -> Vec<ProcessSpec> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Calls to programs other than `dot`
    pub fn simulator_calls(&self) -> Vec<ProcessSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| spec.program_name() != "dot")
            .collect()
    }

    /// Processes currently "running"
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously "running" processes observed
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        spec: &ProcessSpec,
        behavior: FakeBehavior,
        cancel: CancellationToken,
    ) -> Result<Termination, LaunchError> {
        match behavior {
            FakeBehavior::LaunchFailure => Err(LaunchError::NotFound(spec.program.clone())),
            FakeBehavior::Hang => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Ok(Termination::Canceled),
                    _ = tokio::time::sleep(spec.timeout) => Ok(Termination::TimedOut),
                }
            }
            FakeBehavior::Exit { code, delay, files, .. } => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(Termination::Canceled),
                    _ = tokio::time::sleep(spec.timeout) => return Ok(Termination::TimedOut),
                    _ = tokio::time::sleep(delay) => {}
                }
                for (name, contents) in files {
                    let path = spec.work_dir.join(name);
                    tokio::fs::write(&path, contents)
                        .await
                        .map_err(|e| LaunchError::Wait {
                            program: spec.program.clone(),
                            source: e,
                        })?;
                }
                Ok(Termination::Exited(code))
            }
            FakeBehavior::RenderGraph => {
                let target = spec
                    .args
                    .iter()
                    .position(|arg| arg == "-o")
                    .and_then(|idx| spec.args.get(idx + 1))
                    .map(PathBuf::from);
                if let Some(target) = target {
                    let path = if target.is_absolute() {
                        target
                    } else {
                        spec.work_dir.join(target)
                    };
                    tokio::fs::write(&path, "<svg><!-- fake render --></svg>\n")
                        .await
                        .map_err(|e| LaunchError::Wait {
                            program: spec.program.clone(),
                            source: e,
                        })?;
                }
                Ok(Termination::Exited(0))
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        spec: ProcessSpec,
        cancel: CancellationToken,
    ) -> Result<ProcessOutcome, LaunchError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(spec.clone());

        let behavior = (self.handler)(&spec);
        let (stdout, stderr) = match &behavior {
            FakeBehavior::Exit { stdout, stderr, .. } => (stdout.clone(), stderr.clone()),
            _ => (String::new(), String::new()),
        };

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now_running, Ordering::SeqCst);

        let started = Instant::now();
        let result = self.execute(&spec, behavior, cancel).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        let termination = result?;
        let buffer = OutputBuffer::new(spec.output_cap);
        buffer.push(Stream::Stdout, stdout.as_bytes());
        buffer.push(Stream::Stderr, stderr.as_bytes());

        Ok(ProcessOutcome {
            termination,
            output: buffer.snapshot(),
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dir: &std::path::Path) -> ProcessSpec {
        ProcessSpec::new("/opt/jaguar/bin/simFDS", dir)
            .arg("system")
            .timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_exit_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::simulator(FakeBehavior::simulation("system"));

        let outcome = runner
            .run(spec(dir.path()), CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.output.stdout, "simulation complete\n");
        assert!(dir.path().join("system-statespace.dot").exists());
        assert_eq!(runner.simulator_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_exit_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::simulator(
            FakeBehavior::exit(0)
                .with_delay(Duration::from_secs(5))
                .with_file("never.txt", "x"),
        );

        let outcome = runner
            .run(spec(dir.path()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.termination, Termination::TimedOut);
        assert!(!dir.path().join("never.txt").exists());
    }

    #[tokio::test]
    async fn test_hang_is_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::simulator(FakeBehavior::Hang);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = runner.run(spec(dir.path()), cancel).await.unwrap();
        assert_eq!(outcome.termination, Termination::Canceled);
        assert_eq!(runner.running(), 0);
    }

    #[tokio::test]
    async fn test_render_graph_writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::simulator(FakeBehavior::exit(1));
        let out = dir.path().join("graph.svg");

        let outcome = runner
            .run(
                ProcessSpec::new("dot", dir.path())
                    .args(["-Tsvg", "-o", out.to_str().unwrap(), "graph.dot"]),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.success());
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::simulator(FakeBehavior::LaunchFailure);
        let result = runner.run(spec(dir.path()), CancellationToken::new()).await;
        assert!(matches!(result, Err(LaunchError::NotFound(_))));
    }
}
