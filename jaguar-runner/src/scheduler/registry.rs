//! Job registry
//!
//! Every job the supervisor knows about, the FIFO admission queue and the
//! set of admitted jobs. The supervisor keeps one registry behind a
//! single mutex; every state change goes through it, which is what makes
//! cancel and completion race-free. Nothing here is async, so the lock is
//! never held across an `.await`.

use jaguar_core::domain::artifact::Artifact;
use jaguar_core::domain::job::{
    CapturedOutput, FailureKind, Job, JobCompletion, JobFailure, JobId, JobState,
    SimulationRequest, TransitionError,
};
use jaguar_core::domain::log::LogLevel;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A job taken off the queue, ready for its lifecycle task
#[derive(Debug)]
pub(crate) struct Admission {
    pub id: JobId,
    pub request: SimulationRequest,
    pub cancel: CancellationToken,
}

struct Entry {
    job: Job,
    cancel: CancellationToken,
    state: watch::Sender<JobState>,
}

impl Entry {
    fn publish(&self) {
        self.state.send_replace(self.job.state);
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<JobId, Entry>,
    /// Submission order, for listing
    order: Vec<JobId>,
    queue: VecDeque<JobId>,
    /// Jobs holding a slot: admitted and not yet done with their lifecycle
    admitted: HashSet<JobId>,
    /// Admitted jobs that have not launched yet, in admission order. Only
    /// the front one may start.
    launching: VecDeque<JobId>,
    closed: bool,
}

impl Registry {
    /// Adds a queued job at the back of the admission queue
    pub fn enqueue(&mut self, job: Job) -> JobId {
        let id = job.id;
        let (state, _) = watch::channel(job.state);
        self.entries.insert(
            id,
            Entry {
                job,
                cancel: CancellationToken::new(),
                state,
            },
        );
        self.order.push(id);
        self.queue.push_back(id);
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.entries.get(&id).map(|entry| &entry.job)
    }

    /// All known jobs in submission order
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| &entry.job))
    }

    /// Receiver that observes every state change of a job
    pub fn subscribe(&self, id: JobId) -> Option<watch::Receiver<JobState>> {
        self.entries.get(&id).map(|entry| entry.state.subscribe())
    }

    pub fn admitted(&self) -> usize {
        self.admitted.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Takes jobs off the front of the queue while slots are free
    ///
    /// Jobs canceled while queued are skipped. Each admission holds a slot
    /// until [`Registry::release_slot`] is called for it.
    pub fn admit(&mut self, limit: usize) -> Vec<Admission> {
        let mut admissions = Vec::new();
        while self.admitted.len() < limit && !self.closed {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            if entry.job.state != JobState::Queued {
                continue;
            }

            self.admitted.insert(id);
            self.launching.push_back(id);
            admissions.push(Admission {
                id,
                request: entry.job.request.clone(),
                cancel: entry.cancel.clone(),
            });
        }
        admissions
    }

    pub fn release_slot(&mut self, id: JobId) {
        self.admitted.remove(&id);
        self.pass_turn(id);
    }

    /// Whether every job admitted before `id` has launched or given up
    pub fn has_turn(&self, id: JobId) -> bool {
        self.launching.front() == Some(&id)
    }

    /// Lets the next admitted job start
    pub fn pass_turn(&mut self, id: JobId) {
        self.launching.retain(|waiting| *waiting != id);
    }

    /// Binds a workspace to a live job; false once the job is terminal
    pub fn attach_workspace(&mut self, id: JobId, path: PathBuf) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if !entry.job.is_terminal() => {
                entry.job.log(LogLevel::Debug, format!("Workspace {}", path.display()));
                entry.job.attach_workspace(path);
                true
            }
            _ => false,
        }
    }

    /// Moves an admitted job to `Running`; false when it was canceled first
    pub fn start(&mut self, id: JobId) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        let started = entry.job.start().is_ok();
        if started {
            entry.publish();
        }
        started
    }

    /// Records a terminal state
    ///
    /// Fails when the job already reached a terminal state, which is how a
    /// completion arriving after a cancel is dropped.
    pub fn finish(
        &mut self,
        id: JobId,
        state: JobState,
        completion: JobCompletion,
    ) -> Result<(), TransitionError> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Err(TransitionError {
                from: state,
                to: state,
            });
        };
        entry.job.finish(state, completion)?;
        entry.publish();
        Ok(())
    }

    /// Cancels a job; no-op when it is already terminal
    ///
    /// Returns the resulting state, or `None` for an unknown job. A queued
    /// job leaves the queue at once; a running one is marked `Canceled` here
    /// and its process is signalled through the job's token.
    pub fn cancel(&mut self, id: JobId) -> Option<JobState> {
        let entry = self.entries.get_mut(&id)?;
        let message = match entry.job.state {
            JobState::Queued => "canceled before start",
            JobState::Running => "canceled while running",
            state => return Some(state),
        };

        let was_queued = entry.job.state == JobState::Queued;
        let canceled = entry.job.finish(
            JobState::Canceled,
            JobCompletion::failed(JobFailure::new(FailureKind::Canceled, message)),
        );
        if canceled.is_ok() {
            entry.cancel.cancel();
            entry.publish();
        }
        let state = entry.job.state;

        if was_queued {
            self.queue.retain(|queued| *queued != id);
        }
        Some(state)
    }

    pub fn record_canceled_output(
        &mut self,
        id: JobId,
        output: CapturedOutput,
        exit_code: Option<i32>,
    ) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.job.record_canceled_output(output, exit_code);
        }
    }

    pub fn replace_artifact(&mut self, id: JobId, artifact: Artifact) -> bool {
        self.entries
            .get_mut(&id)
            .is_some_and(|entry| entry.job.replace_artifact(artifact))
    }

    /// Terminal jobs whose retention window has passed
    ///
    /// A job whose lifecycle task still holds its slot is never expired,
    /// so a workspace is not removed under a process that is still exiting.
    pub fn expired(&self, now: chrono::DateTime<chrono::Utc>, retention: Duration) -> Vec<JobId> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        self.jobs()
            .filter(|job| {
                job.is_terminal()
                    && !self.admitted.contains(&job.id)
                    && job
                        .finished_at
                        .and_then(|finished| finished.checked_add_signed(retention))
                        .is_some_and(|deadline| deadline <= now)
            })
            .map(|job| job.id)
            .collect()
    }

    /// Removes a job entirely; later lookups report it as not found
    pub fn forget(&mut self, id: JobId) -> Option<Job> {
        let entry = self.entries.remove(&id)?;
        self.order.retain(|known| *known != id);
        self.queue.retain(|queued| *queued != id);
        Some(entry.job)
    }

    /// Stops admission and returns every job that is not terminal yet
    pub fn close(&mut self) -> Vec<JobId> {
        self.closed = true;
        self.jobs()
            .filter(|job| !job.is_terminal())
            .map(|job| job.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(SimulationRequest::new("x1 = x2\n"))
    }

    #[test]
    fn test_admission_is_fifo_and_bounded() {
        let mut registry = Registry::default();
        let a = registry.enqueue(job());
        let b = registry.enqueue(job());
        let c = registry.enqueue(job());

        let first: Vec<JobId> = registry.admit(2).into_iter().map(|a| a.id).collect();
        assert_eq!(first, vec![a, b]);
        assert_eq!(registry.admitted(), 2);
        assert!(registry.admit(2).is_empty());

        registry.release_slot(a);
        let next: Vec<JobId> = registry.admit(2).into_iter().map(|a| a.id).collect();
        assert_eq!(next, vec![c]);
        assert_eq!(registry.queued(), 0);
    }

    #[test]
    fn test_launch_turns_follow_admission_order() {
        let mut registry = Registry::default();
        let a = registry.enqueue(job());
        let b = registry.enqueue(job());
        let c = registry.enqueue(job());
        registry.admit(3);

        assert!(registry.has_turn(a));
        assert!(!registry.has_turn(b));
        assert!(!registry.has_turn(c));

        registry.start(a);
        registry.pass_turn(a);
        assert!(registry.has_turn(b));

        // giving up the slot before launching hands the turn on as well
        registry.release_slot(b);
        assert!(registry.has_turn(c));
    }

    #[test]
    fn test_canceled_queued_job_is_skipped() {
        let mut registry = Registry::default();
        let a = registry.enqueue(job());
        let b = registry.enqueue(job());

        assert_eq!(registry.cancel(a), Some(JobState::Canceled));
        let admitted: Vec<JobId> = registry.admit(1).into_iter().map(|a| a.id).collect();
        assert_eq!(admitted, vec![b]);
        assert!(registry.get(a).unwrap().started_at.is_none());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut registry = Registry::default();
        let id = registry.enqueue(job());
        let admission = registry.admit(1).remove(0);
        assert!(registry.start(id));

        assert_eq!(registry.cancel(id), Some(JobState::Canceled));
        assert!(admission.cancel.is_cancelled());
        assert_eq!(registry.cancel(id), Some(JobState::Canceled));
        assert_eq!(registry.cancel(JobId::new()), None);
        assert_eq!(registry.get(id).unwrap().events.len(), 3);
    }

    #[test]
    fn test_completion_after_cancel_is_dropped() {
        let mut registry = Registry::default();
        let id = registry.enqueue(job());
        registry.admit(1);
        registry.start(id);
        registry.cancel(id);

        let late = registry.finish(
            id,
            JobState::Succeeded,
            JobCompletion {
                exit_code: Some(0),
                ..Default::default()
            },
        );
        assert!(late.is_err());
        assert_eq!(registry.get(id).unwrap().state, JobState::Canceled);
        assert_eq!(registry.get(id).unwrap().exit_code, None);
    }

    #[test]
    fn test_start_fails_after_cancel() {
        let mut registry = Registry::default();
        let id = registry.enqueue(job());
        registry.admit(1);
        registry.cancel(id);
        assert!(!registry.start(id));
        assert!(!registry.attach_workspace(id, PathBuf::from("/tmp/ws")));
    }

    #[test]
    fn test_subscribers_see_state_changes() {
        let mut registry = Registry::default();
        let id = registry.enqueue(job());
        let rx = registry.subscribe(id).unwrap();
        registry.admit(1);
        registry.start(id);
        assert_eq!(*rx.borrow(), JobState::Running);
    }

    #[test]
    fn test_expired_and_forget() {
        let mut registry = Registry::default();
        let done = registry.enqueue(job());
        let live = registry.enqueue(job());
        registry.cancel(done);

        let later = chrono::Utc::now() + chrono::Duration::seconds(10);
        assert_eq!(registry.expired(later, Duration::from_secs(5)), vec![done]);
        assert!(registry.expired(later, Duration::from_secs(60)).is_empty());

        assert!(registry.forget(done).is_some());
        assert!(registry.get(done).is_none());
        assert_eq!(registry.jobs().map(|job| job.id).collect::<Vec<_>>(), vec![live]);
    }

    #[test]
    fn test_jobs_holding_a_slot_never_expire() {
        let mut registry = Registry::default();
        let id = registry.enqueue(job());
        registry.admit(1);
        registry.start(id);
        registry.cancel(id);

        let later = chrono::Utc::now() + chrono::Duration::seconds(10);
        assert!(registry.expired(later, Duration::ZERO).is_empty());
        registry.release_slot(id);
        assert_eq!(registry.expired(later, Duration::ZERO), vec![id]);
    }

    #[test]
    fn test_close_stops_admission() {
        let mut registry = Registry::default();
        let id = registry.enqueue(job());
        assert_eq!(registry.close(), vec![id]);
        assert!(registry.is_closed());
        assert!(registry.admit(4).is_empty());
    }
}
