use crate::config::PollPolicy;
use crate::error::{AppError, AppResult};
use crate::models::job::{ExportJob, JobId, JobRecord, JobState};
use crate::services::job_store::JobStore;
use crate::services::remote::ExportApi;
use crate::services::validation::InputValidator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Drives status queries for export jobs until they reach a terminal state.
pub struct Poller {
    api: Arc<ExportApi>,
    store: JobStore,
    validator: Arc<InputValidator>,
}

impl Poller {
    pub fn new(api: Arc<ExportApi>, store: JobStore, validator: Arc<InputValidator>) -> Self {
        Self { api, store, validator }
    }

    async fn fetch(&self, id: &JobId) -> AppResult<ExportJob> {
        match id {
            JobId::Transactional(tid) => Ok(self.api.export_info(tid.as_str()).await?.into_job(Utc::now())),
            JobId::Account(aid) => Ok(self.api.account_export(*aid).await?.into_job(Utc::now())),
        }
    }

    /// Queries the remote once (or joins a query already in flight for this job)
    /// and records the result. Jobs not yet in the store are registered.
    pub async fn query_status(&self, id: &JobId) -> AppResult<JobRecord> {
        if let JobId::Transactional(tid) = id {
            self.validator.validate_job_id(tid.as_str())?;
        }
        if self.store.contains(id).await {
            return self.store.refresh(id, || self.fetch(id)).await;
        }
        debug!(job_id = %id, "Tracking job that was not submitted through this client");
        self.store.track(id, || self.fetch(id)).await
    }

    /// Polls `id` with backoff until it is terminal.
    ///
    /// Terminal `error` and `expired` jobs are returned as values. The only
    /// failures are a spent wait budget, transport errors that survived retries,
    /// inconsistent remote data, and cancellation. Cancellation leaves the record
    /// as last observed.
    #[instrument(skip(self, policy, cancel), fields(job_id = %id))]
    pub async fn await_completion(&self, id: &JobId, policy: &PollPolicy, cancel: &CancellationToken) -> AppResult<JobRecord> {
        policy.validate()?;

        let mut interval = policy.initial_interval;
        let mut waited = Duration::ZERO;
        let mut queries = 0u32;

        loop {
            let record = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(id).await),
                result = self.query_status(id) => result?,
            };
            queries += 1;

            if record.is_terminal() {
                info!(state = %record.state, queries, ?waited, "Export job reached a terminal state");
                return Ok(record);
            }

            if waited >= policy.max_total_wait {
                warn!(state = %record.state, queries, ?waited, "Polling budget exhausted");
                return Err(AppError::PollTimeout {
                    job_id: id.clone(),
                    waited,
                    last_state: record.state,
                });
            }

            let delay = interval.min(policy.max_total_wait - waited);
            debug!(state = %record.state, ?delay, "Job still running, sleeping before next status query");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(id).await),
                _ = sleep(delay) => {}
            }

            waited += delay;
            interval = policy.next_interval(interval);
        }
    }

    async fn cancelled(&self, id: &JobId) -> AppError {
        let last_state = match self.store.get(id).await {
            Some(record) => record.state,
            None => JobState::Unknown("untracked".to_string()),
        };
        info!(job_id = %id, state = %last_state, "Polling cancelled by caller");
        AppError::Cancelled {
            job_id: id.clone(),
            last_state,
        }
    }
}
