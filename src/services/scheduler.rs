use crate::config::PollPolicy;
use crate::error::{AppError, AppResult};
use crate::models::job::{JobId, JobRecord};
use crate::services::poller::Poller;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ActivePoll {
    handle: JoinHandle<AppResult<JobRecord>>,
    cancel: CancellationToken,
}

/// Runs `await_completion` for many jobs in the background, one task per job.
pub struct PollScheduler {
    poller: Arc<Poller>,
    active: Arc<Mutex<HashMap<JobId, ActivePoll>>>,
    shutdown: CancellationToken,
}

impl PollScheduler {
    pub fn new(poller: Arc<Poller>) -> Self {
        Self {
            poller,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts polling `id` in the background. Returns false if a poll for this
    /// job is already running.
    pub async fn spawn(&self, id: JobId, policy: PollPolicy) -> AppResult<bool> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::Internal("poll scheduler is shutting down".to_string()));
        }
        policy.validate()?;

        let mut active = self.active.lock().await;
        if let Some(existing) = active.get(&id) {
            if !existing.handle.is_finished() {
                debug!(job_id = %id, "Poll already running");
                return Ok(false);
            }
        }

        let cancel = self.shutdown.child_token();
        let poller = self.poller.clone();
        let task_id = id.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move { poller.await_completion(&task_id, &policy, &task_cancel).await });

        info!(job_id = %id, "Scheduled background poll");
        active.insert(id, ActivePoll { handle, cancel });
        Ok(true)
    }

    /// Signals the poll for `id` to stop. The job itself is left untouched.
    pub async fn cancel(&self, id: &JobId) -> bool {
        let active = self.active.lock().await;
        match active.get(id) {
            Some(poll) if !poll.handle.is_finished() => {
                poll.cancel.cancel();
                info!(job_id = %id, "Cancelled background poll");
                true
            }
            _ => false,
        }
    }

    /// Waits for the poll of `id` to finish and returns its outcome.
    pub async fn join(&self, id: &JobId) -> Option<AppResult<JobRecord>> {
        let poll = self.active.lock().await.remove(id)?;
        Some(match poll.handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AppError::Internal(format!("poll task for job {id} failed: {e}"))),
        })
    }

    pub async fn active_count(&self) -> usize {
        let active = self.active.lock().await;
        active.values().filter(|poll| !poll.handle.is_finished()).count()
    }

    /// Cancels every running poll and waits for them to stop.
    pub async fn shutdown(&self) {
        info!("Shutting down poll scheduler");
        self.shutdown.cancel();

        let polls: Vec<(JobId, ActivePoll)> = self.active.lock().await.drain().collect();
        for (id, poll) in polls {
            if let Err(e) = poll.handle.await {
                warn!(job_id = %id, "Poll task ended abnormally during shutdown: {}", e);
            }
        }
    }
}
