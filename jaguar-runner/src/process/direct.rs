//! Direct process execution
//!
//! Spawns the program as a child in its own process group, with a cleared
//! environment and the job workspace as working directory. stdout and
//! stderr are read concurrently into one capped [`OutputBuffer`] so a chatty
//! child can neither block on a full pipe nor exhaust memory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ProcessRunner, ProcessSpec};
use crate::error::LaunchError;
use crate::execution::{ProcessOutcome, Termination};
use crate::service::{OutputBuffer, Stream};

/// Upper bound on waiting for the output readers after the child is gone.
/// A grandchild that inherited the pipes could otherwise hold them open.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Runs programs as real child processes
#[derive(Debug, Clone, Default)]
pub struct DirectRunner;

impl DirectRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for DirectRunner {
    async fn run(
        &self,
        spec: ProcessSpec,
        cancel: CancellationToken,
    ) -> Result<ProcessOutcome, LaunchError> {
        let program = resolve_program(&spec.program)?;

        let mut command = Command::new(&program);
        command
            .args(&spec.args)
            .current_dir(&spec.work_dir)
            .env_clear()
            .envs(spec.env.iter().map(|(name, value)| (name, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so termination reaches anything the program forks
        #[cfg(unix)]
        command.process_group(0);

        debug!(
            program = %program.display(),
            args = ?spec.args,
            cwd = %spec.work_dir.display(),
            "Spawning process"
        );

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LaunchError::NotFound(program.clone()),
            std::io::ErrorKind::PermissionDenied => LaunchError::NotExecutable(program.clone()),
            _ => LaunchError::Spawn {
                program: program.clone(),
                source: e,
            },
        })?;

        let buffer = OutputBuffer::new(spec.output_cap);
        let mut readers = [
            tokio::spawn(pump(child.stdout.take(), Stream::Stdout, buffer.clone())),
            tokio::spawn(pump(child.stderr.take(), Stream::Stderr, buffer.clone())),
        ];

        let deadline = tokio::time::sleep(spec.timeout);
        tokio::pin!(deadline);

        // Termination wins when it is ready in the same poll as the exit
        let termination = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(program = %spec.program_name(), "Cancellation requested, terminating process");
                terminate(&mut child, spec.kill_grace).await;
                Termination::Canceled
            }
            _ = &mut deadline => {
                warn!(program = %spec.program_name(), timeout = ?spec.timeout, "Process timed out, terminating");
                terminate(&mut child, spec.kill_grace).await;
                Termination::TimedOut
            }
            status = child.wait() => {
                let status = status.map_err(|e| LaunchError::Wait {
                    program: program.clone(),
                    source: e,
                })?;
                termination_from_status(status)
            }
        };

        let drained = tokio::time::timeout(READER_DRAIN_TIMEOUT, async {
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(program = %spec.program_name(), "Output pipes still open after exit, abandoning readers");
            for reader in &readers {
                reader.abort();
            }
        }

        let duration = started.elapsed();
        debug!(
            program = %spec.program_name(),
            ?termination,
            ?duration,
            truncated = buffer.is_truncated(),
            "Process finished"
        );

        Ok(ProcessOutcome {
            termination,
            output: buffer.snapshot(),
            duration,
        })
    }
}

/// Checks the program before spawning and makes relative paths absolute
///
/// Bare names (no separator) are left for the PATH lookup at spawn time.
fn resolve_program(program: &Path) -> Result<PathBuf, LaunchError> {
    if program.components().count() <= 1 && !program.is_absolute() {
        return Ok(program.to_path_buf());
    }

    let program = std::path::absolute(program).map_err(|e| LaunchError::Spawn {
        program: program.to_path_buf(),
        source: e,
    })?;

    let metadata = match std::fs::metadata(&program) {
        Ok(metadata) => metadata,
        Err(_) => return Err(LaunchError::NotFound(program)),
    };

    if !metadata.is_file() {
        return Err(LaunchError::NotExecutable(program));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(LaunchError::NotExecutable(program));
        }
    }

    Ok(program)
}

/// Reads a stream to the end, keeping what fits in the buffer
///
/// Keeps reading after the cap is hit so the child never blocks on a full
/// pipe.
async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, stream: Stream, buffer: OutputBuffer) {
    let Some(mut reader) = reader else {
        return;
    };

    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.push(stream, &chunk[..n]),
            Err(e) => {
                debug!(?stream, "Stopped reading process output: {}", e);
                break;
            }
        }
    }
}

/// SIGTERM to the process group, then SIGKILL after `grace`
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            #[allow(clippy::cast_possible_wrap)]
            let group = Pid::from_raw(pid as i32);

            if let Err(e) = killpg(group, Signal::SIGTERM) {
                debug!(pid, "SIGTERM failed: {}", e);
            }

            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }

            warn!(pid, ?grace, "Process ignored SIGTERM, sending SIGKILL");
            let _ = killpg(group, Signal::SIGKILL);
        }
    }

    if let Err(e) = child.start_kill() {
        debug!("Kill failed (process already gone?): {}", e);
    }
    let _ = child.wait().await;
}

fn termination_from_status(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Termination::Signaled(signal);
        }
    }

    Termination::Exited(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn sh(work_dir: &Path, script: &str) -> ProcessSpec {
        ProcessSpec::new("/bin/sh", work_dir)
            .arg("-c")
            .arg(script)
            .timeout(Duration::from_secs(10))
            .kill_grace(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_exit_code_and_output_are_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = DirectRunner::new()
            .run(
                sh(dir.path(), "echo out; echo err >&2; exit 7"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Exited(7));
        assert_eq!(outcome.output.stdout, "out\n");
        assert_eq!(outcome.output.stderr, "err\n");
        assert!(!outcome.output.truncated);
    }

    #[tokio::test]
    async fn test_runs_inside_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = DirectRunner::new()
            .run(
                sh(dir.path(), "echo data > produced.txt"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.success());
        assert!(dir.path().join("produced.txt").exists());
    }

    #[tokio::test]
    async fn test_environment_is_not_inherited() {
        // SAFETY: test-only variable, nothing else reads it concurrently
        unsafe { std::env::set_var("JAGUAR_TEST_SECRET", "hunter2") };
        let dir = tempfile::tempdir().unwrap();

        let outcome = DirectRunner::new()
            .run(
                sh(dir.path(), "echo \"secret=$JAGUAR_TEST_SECRET allowed=$ALLOWED\"")
                    .env("ALLOWED", "yes"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.output.stdout, "secret= allowed=yes\n");
    }

    #[tokio::test]
    async fn test_output_is_truncated_with_flag() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = DirectRunner::new()
            .run(
                sh(dir.path(), "i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done")
                    .output_cap(100),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.success());
        assert!(outcome.output.truncated);
        assert!(outcome.output.stdout.contains("[output truncated at 100 bytes]"));
        assert!(outcome.output.stdout.len() < 200);
    }

    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let outcome = DirectRunner::new()
            .run(
                sh(dir.path(), "echo started; sleep 30").timeout(Duration::from_millis(300)),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert_eq!(outcome.output.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sigterm_ignoring_process_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let outcome = DirectRunner::new()
            .run(
                sh(dir.path(), "trap '' TERM; sleep 30")
                    .timeout(Duration::from_millis(200))
                    .kill_grace(Duration::from_millis(200)),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let outcome = DirectRunner::new()
            .run(sh(dir.path(), "sleep 30"), cancel)
            .await
            .unwrap();
        assert_eq!(outcome.termination, Termination::Canceled);
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DirectRunner::new()
            .run(
                ProcessSpec::new(dir.path().join("simFDS"), dir.path()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(LaunchError::NotFound(_))));

        let result = DirectRunner::new()
            .run(
                ProcessSpec::new("jaguar-no-such-program", dir.path()),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(LaunchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_non_executable_file_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("simFDS");
        std::fs::write(&program, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o644)).unwrap();

        let result = DirectRunner::new()
            .run(ProcessSpec::new(&program, dir.path()), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LaunchError::NotExecutable(_))));
    }
}
