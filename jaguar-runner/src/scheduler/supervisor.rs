//! Job supervisor
//!
//! Owns every job from submission to expiry. Submitted jobs wait in a FIFO
//! queue; at most `max_running_jobs` are admitted at once, each driven by
//! its own lifecycle task:
//!
//! 1. allocate a workspace (one retry on transient failures)
//! 2. write the input file atomically
//! 3. wait for every earlier admission to launch, then `Queued -> Running`
//!    and launch the simulator
//! 4. render on success (or best-effort on failure when enabled)
//! 5. record the terminal state, free the slot, admit the next job
//!
//! All state lives in one [`Registry`] behind a mutex that is never held
//! across an `.await`. Cancelling a running job records `Canceled` there
//! immediately and signals the process; the lifecycle task's own
//! completion then fails its transition and is dropped.

use jaguar_core::domain::artifact::{Artifact, RenderFormat};
use jaguar_core::domain::job::{
    FailureKind, Job, JobCompletion, JobFailure, JobId, JobState, SimulationRequest,
};
use jaguar_core::dto::job::{JobDiagnostics, JobStatusView};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Poll;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::registry::{Admission, Registry};
use super::sweeper;
use crate::config::Config;
use crate::error::{ConfigError, ResultError, SupervisorError, WorkspaceError};
use crate::process::{ProcessRunner, ProcessSpec};
use crate::render::Renderer;
use crate::service::{Workspace, WorkspaceManager};

/// Pause before the single allocation retry
const ALLOCATION_RETRY_DELAY: Duration = Duration::from_millis(200);

pub(crate) struct Inner {
    config: Arc<Config>,
    registry: Mutex<Registry>,
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<dyn ProcessRunner>,
    renderer: Renderer,
    /// Signalled whenever an admitted job launches or gives up its slot
    turn: Notify,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// Handle to the job supervisor
///
/// Cheap to clone; every clone drives the same set of jobs. All methods are
/// safe to call concurrently.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Validates `config`, reclaims orphaned workspaces and starts the
    /// retention sweeper
    ///
    /// Must be called from within a tokio runtime. The workspace root is
    /// owned by one supervisor at a time.
    pub fn start(config: Config, runner: Arc<dyn ProcessRunner>) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);

        let workspaces = Arc::new(WorkspaceManager::from_config(&config));
        if let Err(e) = workspaces.reclaim_orphans() {
            warn!("Could not reclaim orphan workspaces: {}", e);
        }

        let inner = Arc::new(Inner {
            renderer: Renderer::new(Arc::clone(&runner), Arc::clone(&config)),
            config: Arc::clone(&config),
            registry: Mutex::new(Registry::default()),
            workspaces,
            runner,
            turn: Notify::new(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        });

        inner.tasks.spawn(sweeper::run(
            Arc::downgrade(&inner),
            config.sweep_interval,
            inner.shutdown.clone(),
        ));

        info!(
            simulator = %config.simulator_path.display(),
            root = %config.workspace_root.display(),
            max_running = config.max_running_jobs,
            "Supervisor started"
        );

        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Enqueues a simulation request
    ///
    /// Never waits for the job to run. Fails only while shutting down.
    pub fn submit(&self, request: SimulationRequest) -> Result<JobId, SupervisorError> {
        let id = {
            let mut registry = self.registry();
            if registry.is_closed() {
                return Err(SupervisorError::ShuttingDown);
            }
            registry.enqueue(Job::new(request))
        };
        info!(job_id = %id, "Job submitted");

        self.pump();
        Ok(id)
    }

    /// Current state of a job, with a short cause for failures
    pub fn status(&self, id: JobId) -> Result<JobStatusView, SupervisorError> {
        self.registry()
            .get(id)
            .map(JobStatusView::from)
            .ok_or(SupervisorError::NotFound(id))
    }

    /// Cancels a job and returns the state it ends up in
    ///
    /// Idempotent: canceling a terminal job changes nothing.
    pub fn cancel(&self, id: JobId) -> Result<JobState, SupervisorError> {
        let state = self
            .registry()
            .cancel(id)
            .ok_or(SupervisorError::NotFound(id))?;
        info!(job_id = %id, state = %state, "Cancel requested");
        Ok(state)
    }

    /// The artifact of a succeeded job, or why there is none
    pub fn result(&self, id: JobId) -> Result<Artifact, ResultError> {
        let registry = self.registry();
        let job = registry.get(id).ok_or(ResultError::NotFound(id))?;

        if !job.is_terminal() {
            return Err(ResultError::NotReady {
                id,
                state: job.state,
            });
        }
        if let Some(failure) = &job.failure {
            return Err(ResultError::from_failure(failure, job.exit_code));
        }
        job.artifact.clone().ok_or(ResultError::NoArtifact(id))
    }

    /// Full captured output, failure detail and lifecycle events
    pub fn diagnostics(&self, id: JobId) -> Result<JobDiagnostics, SupervisorError> {
        self.registry()
            .get(id)
            .map(JobDiagnostics::from)
            .ok_or(SupervisorError::NotFound(id))
    }

    /// Every known job in submission order
    pub fn list(&self) -> Vec<JobStatusView> {
        self.registry().jobs().map(JobStatusView::from).collect()
    }

    /// Resolves once the job is terminal
    pub async fn wait(&self, id: JobId) -> Result<JobStatusView, SupervisorError> {
        let mut state = self
            .registry()
            .subscribe(id)
            .ok_or(SupervisorError::NotFound(id))?;
        state
            .wait_for(JobState::is_terminal)
            .await
            .map_err(|_| SupervisorError::NotFound(id))?;
        self.status(id)
    }

    /// Renders a succeeded job again, replacing its artifact
    ///
    /// The new files go to a fresh directory, so the previous artifact stays
    /// intact until the reference is swapped.
    pub async fn regenerate(
        &self,
        id: JobId,
        format: RenderFormat,
    ) -> Result<Artifact, SupervisorError> {
        let (path, system_text) = {
            let registry = self.registry();
            let job = registry.get(id).ok_or(SupervisorError::NotFound(id))?;
            if job.state != JobState::Succeeded {
                return Err(SupervisorError::NotRenderable {
                    id,
                    state: job.state,
                });
            }
            let path = job
                .workspace
                .clone()
                .ok_or(SupervisorError::WorkspaceGone(id))?;
            (path, job.request.system_text.clone())
        };

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SupervisorError::WorkspaceGone(id));
        }

        let workspace = Workspace::existing(id, path);
        let artifact = self
            .inner
            .renderer
            .render(
                &workspace,
                &system_text,
                format,
                false,
                self.inner.shutdown.child_token(),
            )
            .await?;

        if !self.registry().replace_artifact(id, artifact.clone()) {
            return Err(SupervisorError::NotFound(id));
        }
        info!(job_id = %id, format = %format, "Artifact regenerated");
        Ok(artifact)
    }

    /// Releases the workspaces of expired jobs and forgets them
    ///
    /// Returns how many jobs were removed. Called periodically by the
    /// retention sweeper.
    pub async fn sweep_expired(&self) -> usize {
        let expired: Vec<Job> = {
            let mut registry = self.registry();
            registry
                .expired(chrono::Utc::now(), self.inner.config.retention)
                .into_iter()
                .filter_map(|id| registry.forget(id))
                .collect()
        };

        for job in &expired {
            debug!(job_id = %job.id, "Job expired");
            if job.workspace.is_some() {
                self.release_workspace(job.id).await;
            }
        }
        expired.len()
    }

    /// Stops admission, cancels every live job and waits for all lifecycle
    /// tasks and the sweeper to finish
    pub async fn shutdown(&self) {
        let canceled = {
            let mut registry = self.registry();
            let live = registry.close();
            for id in &live {
                registry.cancel(*id);
            }
            live.len()
        };
        info!(canceled, "Supervisor shutting down");

        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!("Supervisor stopped");
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry methods never leave an entry half-updated, so a poisoned
        // lock is still consistent.
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admits queued jobs into free slots and spawns their lifecycle tasks
    fn pump(&self) {
        let admissions = self.registry().admit(self.inner.config.max_running_jobs);
        for admission in admissions {
            debug!(job_id = %admission.id, "Job admitted");
            let supervisor = self.clone();
            self.inner
                .tasks
                .spawn(async move { supervisor.run_lifecycle(admission).await });
        }
    }

    async fn run_lifecycle(self, admission: Admission) {
        let Admission {
            id,
            request,
            cancel,
        } = admission;
        let _slot = SlotGuard {
            supervisor: self.clone(),
            id,
        };
        let config = Arc::clone(&self.inner.config);

        let workspace = match self.allocate(id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(job_id = %id, "Workspace allocation failed: {}", e);
                self.complete(
                    id,
                    JobState::Failed,
                    JobCompletion::failed(JobFailure::new(FailureKind::Allocation, e.to_string())),
                );
                return;
            }
        };

        if !self
            .registry()
            .attach_workspace(id, workspace.path().to_path_buf())
        {
            debug!(job_id = %id, "Job canceled during allocation");
            self.release_workspace(id).await;
            return;
        }

        if let Err(e) = self
            .write_input(&workspace, config.input_file_name(), request.system_text.clone())
            .await
        {
            warn!(job_id = %id, "Failed to write simulator input: {}", e);
            self.complete(
                id,
                JobState::Failed,
                JobCompletion::failed(JobFailure::new(
                    FailureKind::Allocation,
                    format!("failed to write input: {}", e),
                )),
            );
            return;
        }

        self.wait_for_turn(id, &cancel).await;
        if !self.registry().start(id) {
            debug!(job_id = %id, "Job canceled before start");
            return;
        }
        info!(job_id = %id, "Job running");

        let spec = ProcessSpec::new(&config.simulator_path, workspace.path())
            .with_limits(&config, config.job_timeout)
            .arg(config.model_stem.clone());

        // The first poll launches the process; only then may the next
        // admitted job start.
        let mut run = self.inner.runner.run(spec, cancel.clone());
        let launched = std::future::poll_fn(|cx| Poll::Ready(run.as_mut().poll(cx))).await;
        self.pass_turn(id);
        let finished = match launched {
            Poll::Ready(finished) => finished,
            Poll::Pending => run.await,
        };

        let outcome = match finished {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id = %id, "Simulator launch failed: {}", e);
                self.complete(
                    id,
                    JobState::Failed,
                    JobCompletion::failed(JobFailure::new(FailureKind::Launch, e.to_string())),
                );
                return;
            }
        };
        debug!(
            job_id = %id,
            termination = ?outcome.termination,
            duration_ms = outcome.duration.as_millis() as u64,
            "Simulator finished"
        );

        let mut state = outcome.job_state();
        if state == JobState::Canceled {
            let exit_code = outcome.exit_code();
            self.registry()
                .record_canceled_output(id, outcome.output, exit_code);
            return;
        }

        let mut completion = JobCompletion {
            exit_code: outcome.exit_code(),
            failure: outcome.failure(config.job_timeout),
            output: outcome.output,
            artifact: None,
            partial_artifact: None,
        };

        if request.render_enabled {
            let format = request.render.unwrap_or(config.render_format);
            if state == JobState::Succeeded {
                match self
                    .inner
                    .renderer
                    .render(&workspace, &request.system_text, format, false, cancel)
                    .await
                {
                    Ok(artifact) => completion.artifact = Some(artifact),
                    Err(e) => {
                        warn!(job_id = %id, "Rendering failed: {}", e);
                        state = JobState::Failed;
                        completion.failure =
                            Some(JobFailure::new(FailureKind::Render, e.to_string()));
                    }
                }
            } else if config.render_partial {
                match self
                    .inner
                    .renderer
                    .render(&workspace, &request.system_text, format, true, cancel)
                    .await
                {
                    Ok(artifact) => completion.partial_artifact = Some(artifact),
                    Err(e) => debug!(job_id = %id, "No partial artifact: {}", e),
                }
            }
        }

        self.complete(id, state, completion);
    }

    /// Records a terminal state unless the job already has one
    fn complete(&self, id: JobId, state: JobState, completion: JobCompletion) {
        let output = completion.output.clone();
        let exit_code = completion.exit_code;

        let mut registry = self.registry();
        match registry.finish(id, state, completion) {
            Ok(()) => info!(job_id = %id, state = %state, "Job finished"),
            Err(e) => {
                debug!(job_id = %id, "Dropping completion: {}", e);
                registry.record_canceled_output(id, output, exit_code);
            }
        }
    }

    /// Resolves once every job admitted before `id` has launched or given
    /// up its slot, or when `id` is canceled
    async fn wait_for_turn(&self, id: JobId, cancel: &CancellationToken) {
        loop {
            // Registered before the check so a turn passed in between is
            // not missed
            let notified = self.inner.turn.notified();
            if cancel.is_cancelled() || self.registry().has_turn(id) {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    fn pass_turn(&self, id: JobId) {
        self.registry().pass_turn(id);
        self.inner.turn.notify_waiters();
    }

    async fn allocate(&self, id: JobId) -> Result<Workspace, WorkspaceError> {
        match self.allocate_once(id).await {
            Err(e) if e.is_transient() => {
                warn!(job_id = %id, "Workspace allocation failed, retrying once: {}", e);
                tokio::time::sleep(ALLOCATION_RETRY_DELAY).await;
                self.allocate_once(id).await
            }
            result => result,
        }
    }

    async fn allocate_once(&self, id: JobId) -> Result<Workspace, WorkspaceError> {
        let workspaces = Arc::clone(&self.inner.workspaces);
        blocking(move || workspaces.allocate(id)).await
    }

    async fn write_input(
        &self,
        workspace: &Workspace,
        file_name: String,
        contents: String,
    ) -> Result<PathBuf, WorkspaceError> {
        let workspaces = Arc::clone(&self.inner.workspaces);
        let workspace = workspace.clone();
        blocking(move || workspaces.write_input(&workspace, &file_name, contents.as_bytes())).await
    }

    async fn release_workspace(&self, id: JobId) {
        let workspaces = Arc::clone(&self.inner.workspaces);
        if let Err(e) = blocking(move || workspaces.release(id)).await {
            warn!(job_id = %id, "Failed to release workspace: {}", e);
        }
    }
}

/// Runs blocking filesystem work off the async worker threads
async fn blocking<T, F>(f: F) -> Result<T, WorkspaceError>
where
    F: FnOnce() -> Result<T, WorkspaceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|e| Err(WorkspaceError::io(PathBuf::new(), std::io::Error::other(e))))
}

/// Frees a job's admission slot when its lifecycle task ends, however it ends
struct SlotGuard {
    supervisor: Supervisor,
    id: JobId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        {
            let mut registry = self.supervisor.registry();
            if registry.get(self.id).is_some_and(|job| !job.is_terminal()) {
                // only reachable when the lifecycle task panicked
                let _ = registry.finish(
                    self.id,
                    JobState::Failed,
                    JobCompletion::failed(JobFailure::new(
                        FailureKind::Launch,
                        "job lifecycle aborted",
                    )),
                );
            }
            registry.release_slot(self.id);
        }
        self.supervisor.inner.turn.notify_waiters();

        if tokio::runtime::Handle::try_current().is_ok() {
            self.supervisor.pump();
        }
    }
}
