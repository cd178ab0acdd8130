//! Job broker
//!
//! Process-wide registry of clip jobs. All mutations go through the broker,
//! which serializes them behind a single lock, enforces the transition graph
//! and republishes every change on the event bus. The lock is never held
//! across I/O or an await point; reads hand out snapshot copies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::JobError;
use crate::events::{BusEvent, EventBus};
use crate::jobs::{Job, JobPatch, JobState};
use crate::models::Platform;

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

/// Shared registry handle. Cheap to clone.
#[derive(Clone)]
pub struct JobBroker {
    jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    bus: EventBus,
    shutting_down: Arc<AtomicBool>,
}

impl JobBroker {
    pub fn new(bus: EventBus) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            bus,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a job in `initializing` and publish `job_created`.
    pub fn create(&self, platform: Platform, streamer_ref: &str) -> Result<Job, JobError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(JobError::ShuttingDown);
        }
        let job = Job::new(platform, streamer_ref);
        let snapshot = job.clone();
        {
            let mut jobs = self.jobs.lock().expect("job registry poisoned");
            jobs.insert(
                job.id,
                JobEntry {
                    job,
                    cancel: CancellationToken::new(),
                },
            );
        }
        info!(job_id = %snapshot.id, platform = %snapshot.platform, streamer = %snapshot.streamer_ref, "job created");
        self.bus.publish(BusEvent::JobCreated(snapshot.clone()));
        Ok(snapshot)
    }

    /// Advance a job along the transition graph, applying `patch` atomically
    /// with the state change.
    pub fn transition(
        &self,
        job_id: Uuid,
        new_state: JobState,
        patch: JobPatch,
    ) -> Result<Job, JobError> {
        let snapshot = {
            let mut jobs = self.jobs.lock().expect("job registry poisoned");
            let entry = jobs.get_mut(&job_id).ok_or(JobError::UnknownJob(job_id))?;
            if !entry.job.state.can_transition_to(new_state) {
                return Err(JobError::InvalidTransition {
                    job_id,
                    from: entry.job.state,
                    to: new_state,
                });
            }
            entry.job.state = new_state;
            // Progress restarts per stage; a terminal success means 100.
            entry.job.progress = match new_state {
                JobState::Captured | JobState::Completed | JobState::Uploaded => 100,
                JobState::Error => entry.job.progress,
                _ => 0,
            };
            patch.apply(&mut entry.job);
            entry.job.updated_at = Utc::now();
            entry.job.clone()
        };

        debug!(job_id = %job_id, state = %new_state, "job transitioned");
        self.publish_for(&snapshot);
        Ok(snapshot)
    }

    /// Record stage progress. Values below the current progress are ignored
    /// so progress is non-decreasing within a state.
    pub fn update_progress(&self, job_id: Uuid, progress: u8) -> Result<Job, JobError> {
        let snapshot = {
            let mut jobs = self.jobs.lock().expect("job registry poisoned");
            let entry = jobs.get_mut(&job_id).ok_or(JobError::UnknownJob(job_id))?;
            let progress = progress.min(100);
            if progress <= entry.job.progress {
                return Ok(entry.job.clone());
            }
            entry.job.progress = progress;
            entry.job.updated_at = Utc::now();
            entry.job.clone()
        };
        self.bus.publish(BusEvent::JobUpdated(snapshot.clone()));
        Ok(snapshot)
    }

    /// Apply a patch without changing state (e.g. preview frame paths).
    pub fn annotate(&self, job_id: Uuid, patch: JobPatch) -> Result<Job, JobError> {
        let snapshot = {
            let mut jobs = self.jobs.lock().expect("job registry poisoned");
            let entry = jobs.get_mut(&job_id).ok_or(JobError::UnknownJob(job_id))?;
            patch.apply(&mut entry.job);
            entry.job.updated_at = Utc::now();
            entry.job.clone()
        };
        self.bus.publish(BusEvent::JobUpdated(snapshot.clone()));
        Ok(snapshot)
    }

    /// Fail a job with a reason, from whatever non-terminal state it is in.
    pub fn fail(&self, job_id: Uuid, reason: impl Into<String>) -> Result<Job, JobError> {
        self.transition(job_id, JobState::Error, JobPatch::error_reason(reason))
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        let jobs = self.jobs.lock().expect("job registry poisoned");
        jobs.get(&job_id).map(|e| e.job.clone())
    }

    /// Snapshot of all jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.lock().expect("job registry poisoned");
        let mut all: Vec<Job> = jobs.values().map(|e| e.job.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Remove a job from the registry. Only terminal jobs may be deleted.
    pub fn delete(&self, job_id: Uuid) -> Result<Job, JobError> {
        let mut jobs = self.jobs.lock().expect("job registry poisoned");
        let entry = jobs.get(&job_id).ok_or(JobError::UnknownJob(job_id))?;
        if !entry.job.state.is_terminal() {
            return Err(JobError::NotTerminal(job_id));
        }
        let entry = jobs.remove(&job_id).expect("entry exists");
        Ok(entry.job)
    }

    /// Cancellation token observed by the job's pipeline task.
    pub fn cancel_token(&self, job_id: Uuid) -> Option<CancellationToken> {
        let jobs = self.jobs.lock().expect("job registry poisoned");
        jobs.get(&job_id).map(|e| e.cancel.clone())
    }

    /// Signal cancellation for one job. Idempotent; the pipeline task
    /// performs the actual teardown and state transition.
    pub fn cancel(&self, job_id: Uuid) -> Result<(), JobError> {
        let jobs = self.jobs.lock().expect("job registry poisoned");
        let entry = jobs.get(&job_id).ok_or(JobError::UnknownJob(job_id))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Force-fail non-terminal jobs idle longer than `max_idle`.
    pub fn sweep_stalled(&self, max_idle: Duration) -> Vec<Job> {
        let cutoff = Utc::now() - max_idle;
        let stalled: Vec<Uuid> = {
            let jobs = self.jobs.lock().expect("job registry poisoned");
            jobs.values()
                .filter(|e| !e.job.state.is_terminal() && e.job.updated_at < cutoff)
                .map(|e| e.job.id)
                .collect()
        };

        let mut swept = Vec::new();
        for id in stalled {
            if let Some(token) = self.cancel_token(id) {
                token.cancel();
            }
            match self.fail(id, "stalled") {
                Ok(job) => {
                    warn!(job_id = %id, "stalled job force-failed");
                    swept.push(job);
                }
                Err(err) => debug!(job_id = %id, %err, "stall sweep lost race"),
            }
        }
        swept
    }

    /// Drop terminal jobs older than `max_age`. Returns the removed jobs so
    /// the garbage collector can reclaim their artifacts.
    pub fn prune_terminal(&self, max_age: Duration) -> Vec<Job> {
        let cutoff = Utc::now() - max_age;
        let mut jobs = self.jobs.lock().expect("job registry poisoned");
        let expired: Vec<Uuid> = jobs
            .values()
            .filter(|e| e.job.state.is_terminal() && e.job.updated_at < cutoff)
            .map(|e| e.job.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| jobs.remove(&id))
            .map(|e| e.job)
            .collect()
    }

    /// Stop accepting new jobs and cancel all in-flight ones.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let jobs = self.jobs.lock().expect("job registry poisoned");
        for entry in jobs.values() {
            if !entry.job.state.is_terminal() {
                entry.cancel.cancel();
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn publish_for(&self, job: &Job) {
        self.bus.publish(BusEvent::JobUpdated(job.clone()));
        let extra = match job.state {
            JobState::Captured => Some(BusEvent::CaptureComplete(job.clone())),
            JobState::Completed => Some(BusEvent::ClipComplete(job.clone())),
            JobState::Uploaded => Some(BusEvent::UploadComplete(job.clone())),
            JobState::Error => Some(BusEvent::JobError(job.clone())),
            _ => None,
        };
        if let Some(event) = extra {
            self.bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> JobBroker {
        JobBroker::new(EventBus::new())
    }

    #[test]
    fn create_then_get() {
        let broker = broker();
        let job = broker.create(Platform::Twitch, "kai").unwrap();
        let fetched = broker.get(job.id).unwrap();
        assert_eq!(fetched.state, JobState::Initializing);
        assert_eq!(fetched.streamer_ref, "kai");
    }

    #[test]
    fn transition_enforces_graph() {
        let broker = broker();
        let job = broker.create(Platform::Twitch, "kai").unwrap();

        broker
            .transition(job.id, JobState::Resolving, JobPatch::default())
            .unwrap();
        let err = broker
            .transition(job.id, JobState::Captured, JobPatch::default())
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[test]
    fn progress_is_monotonic_within_state() {
        let broker = broker();
        let job = broker.create(Platform::Twitch, "kai").unwrap();
        broker
            .transition(job.id, JobState::Resolving, JobPatch::default())
            .unwrap();
        broker
            .transition(job.id, JobState::Capturing, JobPatch::default())
            .unwrap();

        broker.update_progress(job.id, 40).unwrap();
        broker.update_progress(job.id, 20).unwrap();
        assert_eq!(broker.get(job.id).unwrap().progress, 40);
        broker.update_progress(job.id, 90).unwrap();
        assert_eq!(broker.get(job.id).unwrap().progress, 90);
    }

    #[test]
    fn delete_requires_terminal() {
        let broker = broker();
        let job = broker.create(Platform::Kick, "waxiest").unwrap();
        assert!(matches!(
            broker.delete(job.id),
            Err(JobError::NotTerminal(_))
        ));
        broker.fail(job.id, "boom").unwrap();
        broker.delete(job.id).unwrap();
        assert!(broker.get(job.id).is_none());
    }

    #[test]
    fn shutdown_rejects_new_jobs() {
        let broker = broker();
        broker.begin_shutdown();
        assert!(matches!(
            broker.create(Platform::Twitch, "kai"),
            Err(JobError::ShuttingDown)
        ));
    }

    #[test]
    fn sweep_stalled_only_touches_idle_non_terminal() {
        let broker = broker();
        let stalled = broker.create(Platform::Twitch, "old").unwrap();
        let fresh = broker.create(Platform::Twitch, "new").unwrap();

        // Age the first job artificially.
        {
            let mut jobs = broker.jobs.lock().unwrap();
            jobs.get_mut(&stalled.id).unwrap().job.updated_at =
                Utc::now() - Duration::minutes(45);
        }

        let swept = broker.sweep_stalled(Duration::minutes(30));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, stalled.id);
        assert_eq!(broker.get(stalled.id).unwrap().state, JobState::Error);
        assert_eq!(
            broker.get(stalled.id).unwrap().error_reason.as_deref(),
            Some("stalled")
        );
        assert_eq!(broker.get(fresh.id).unwrap().state, JobState::Initializing);
    }

    #[test]
    fn prune_terminal_returns_artifact_owners() {
        let broker = broker();
        let done = broker.create(Platform::Twitch, "done").unwrap();
        broker.fail(done.id, "x").unwrap();
        {
            let mut jobs = broker.jobs.lock().unwrap();
            jobs.get_mut(&done.id).unwrap().job.updated_at = Utc::now() - Duration::hours(30);
        }
        let active = broker.create(Platform::Twitch, "active").unwrap();

        let pruned = broker.prune_terminal(Duration::hours(24));
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].id, done.id);
        assert!(broker.get(active.id).is_some());
    }
}
