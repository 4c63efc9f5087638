use crate::error::{AppError, AppResult, Operation};
use crate::models::job::{ExportJob, JobId, JobState, Observation, TransitionError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

struct JobSlot {
    record: RwLock<ExportJob>,
    // Held for the duration of a remote status query on this job.
    query_gate: Mutex<()>,
    // Bumped on every accepted observation.
    generation: AtomicU64,
}

impl JobSlot {
    fn new(job: ExportJob) -> Self {
        Self {
            record: RwLock::new(job),
            query_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }
}

/// In-memory registry of known export jobs and their last observed state.
///
/// Reads run concurrently; writes to one job are serialized on that job's slot,
/// and so are its remote status queries.
#[derive(Clone)]
pub struct JobStore {
    slots: Arc<RwLock<HashMap<JobId, Arc<JobSlot>>>>,
    // Query gates for jobs that are being fetched before they have a slot.
    pending: Arc<Mutex<HashMap<JobId, Arc<Mutex<()>>>>>,
    validity: Duration,
}

impl JobStore {
    pub fn new(validity: Duration) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            validity,
        }
    }

    async fn slot(&self, id: &JobId) -> Option<Arc<JobSlot>> {
        self.slots.read().await.get(id).cloned()
    }

    /// Registers a newly created job. Fails if the id is already known.
    pub async fn insert(&self, job: ExportJob) -> AppResult<ExportJob> {
        let now = Utc::now();
        let job = self.prepare_new(job, now)?;

        let mut slots = self.slots.write().await;
        if let Some(existing) = slots.get(&job.id) {
            let existing_state = existing.record.read().await.state.clone();
            return Err(AppError::InconsistentState {
                job_id: job.id.clone(),
                from: existing_state,
                to: job.state.clone(),
                reason: "job id is already registered".to_string(),
            });
        }

        slots.insert(job.id.clone(), Arc::new(JobSlot::new(job.clone())));
        info!(job_id = %job.id, kind = %job.kind, state = %job.state, "Registered export job");
        Ok(job)
    }

    /// Records an observation of a job, registering it if unknown.
    pub async fn upsert(&self, observed: ExportJob) -> AppResult<ExportJob> {
        if let Some(slot) = self.slot(&observed.id).await {
            return self.apply_to_slot(&slot, observed).await;
        }

        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(&observed.id).cloned() {
            drop(slots);
            return self.apply_to_slot(&slot, observed).await;
        }

        let job = self.prepare_new(observed, Utc::now())?;
        slots.insert(job.id.clone(), Arc::new(JobSlot::new(job.clone())));
        debug!(job_id = %job.id, state = %job.state, "Registered job from listing");
        Ok(job)
    }

    /// Returns a snapshot of the job, applying the lazy expiry transition.
    pub async fn get(&self, id: &JobId) -> Option<ExportJob> {
        let slot = self.slot(id).await?;
        Some(self.snapshot(&slot, Utc::now()).await)
    }

    pub async fn contains(&self, id: &JobId) -> bool {
        self.slots.read().await.contains_key(id)
    }

    /// Refreshes a job from the remote, coalescing concurrent callers: while one
    /// caller's query is in flight, others wait and then reuse its result.
    pub async fn refresh<F, Fut>(&self, id: &JobId, fetch: F) -> AppResult<ExportJob>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<ExportJob>>,
    {
        let slot = self.slot(id).await.ok_or_else(|| AppError::NotFound {
            operation: Operation::QueryStatus,
            job_id: Some(id.clone()),
            message: "job is not registered in the store".to_string(),
        })?;

        let seen = slot.generation.load(Ordering::SeqCst);
        let _gate = slot.query_gate.lock().await;

        if slot.generation.load(Ordering::SeqCst) != seen {
            debug!(job_id = %id, "Reusing status observed by a concurrent query");
            return Ok(self.snapshot(&slot, Utc::now()).await);
        }

        let observed = fetch().await.map_err(|e| e.with_job(id))?;
        if observed.id != *id {
            let current = slot.record.read().await.state.clone();
            return Err(AppError::InconsistentState {
                job_id: id.clone(),
                from: current,
                to: observed.state,
                reason: format!("status response described job {}", observed.id),
            });
        }

        self.apply_to_slot(&slot, observed).await
    }

    /// Fetches and registers a job the store has not seen yet. Concurrent callers
    /// for the same id queue on one gate; whoever gets it after the job was
    /// registered reuses the stored record instead of querying again.
    pub async fn track<F, Fut>(&self, id: &JobId, fetch: F) -> AppResult<ExportJob>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<ExportJob>>,
    {
        let gate = self
            .pending
            .lock()
            .await
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let outcome = {
            let _held = gate.lock().await;
            match self.slot(id).await {
                Some(slot) => {
                    debug!(job_id = %id, "Reusing job registered by a concurrent query");
                    Ok(self.snapshot(&slot, Utc::now()).await)
                }
                None => self.fetch_untracked(id, fetch).await,
            }
        };

        let mut pending = self.pending.lock().await;
        // Only the map and this call still hold the gate.
        if Arc::strong_count(&gate) == 2 {
            pending.remove(id);
        }
        outcome
    }

    async fn fetch_untracked<F, Fut>(&self, id: &JobId, fetch: F) -> AppResult<ExportJob>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<ExportJob>>,
    {
        debug!(job_id = %id, "Querying job not yet known locally");
        let observed = fetch().await.map_err(|e| e.with_job(id))?;
        if observed.id != *id {
            return Err(AppError::Decode {
                operation: Operation::QueryStatus,
                message: format!("status response for {id} described job {}", observed.id),
            });
        }
        self.upsert(observed).await
    }

    pub async fn list(&self) -> Vec<ExportJob> {
        let slots: Vec<Arc<JobSlot>> = self.slots.read().await.values().cloned().collect();
        let now = Utc::now();

        let mut jobs = Vec::with_capacity(slots.len());
        for slot in slots {
            jobs.push(self.snapshot(&slot, now).await);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn list_by_state(&self, state: &JobState) -> Vec<ExportJob> {
        self.list().await.into_iter().filter(|job| job.state == *state).collect()
    }

    pub async fn remove(&self, id: &JobId) -> Option<ExportJob> {
        let slot = self.slots.write().await.remove(id)?;
        let job = slot.record.read().await.clone();
        debug!(job_id = %id, "Removed job from store");
        Some(job)
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Job counts keyed by state name.
    pub async fn stats(&self) -> HashMap<String, usize> {
        let mut stats = HashMap::new();
        for job in self.list().await {
            *stats.entry(job.state.as_str().to_string()).or_insert(0) += 1;
        }
        stats
    }

    /// Applies `complete -> expired` to every record whose window elapsed by `now`.
    pub async fn expire_elapsed(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let slots: Vec<Arc<JobSlot>> = self.slots.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for slot in slots {
            let mut record = slot.record.write().await;
            if record.apply_lazy_expiry(now, self.validity) {
                info!(job_id = %record.id, "Artifact window elapsed, job marked expired");
                expired.push(record.id.clone());
            }
        }
        expired
    }

    /// Drops terminal records that finished before `cutoff`.
    pub async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<JobId> {
        let mut slots = self.slots.write().await;

        let mut stale = Vec::new();
        for (id, slot) in slots.iter() {
            let record = slot.record.read().await;
            if record.is_terminal() && record.finished_at.is_some_and(|finished| finished < cutoff) {
                stale.push(id.clone());
            }
        }
        for id in &stale {
            slots.remove(id);
        }
        stale
    }

    fn prepare_new(&self, job: ExportJob, now: DateTime<Utc>) -> AppResult<ExportJob> {
        let id = job.id.clone();
        let mut job = job.settle(now).map_err(|e| inconsistent(&id, e))?;
        job.apply_lazy_expiry(now, self.validity);
        Ok(job)
    }

    async fn snapshot(&self, slot: &JobSlot, now: DateTime<Utc>) -> ExportJob {
        {
            let record = slot.record.read().await;
            if !(record.state == JobState::Complete && record.artifact_window_elapsed(now, self.validity)) {
                return record.clone();
            }
        }

        let mut record = slot.record.write().await;
        if record.apply_lazy_expiry(now, self.validity) {
            info!(job_id = %record.id, "Artifact window elapsed, job marked expired");
        }
        record.clone()
    }

    async fn apply_to_slot(&self, slot: &JobSlot, observed: ExportJob) -> AppResult<ExportJob> {
        let now = Utc::now();
        let mut record = slot.record.write().await;
        record.apply_lazy_expiry(now, self.validity);

        match record.observe(observed, now) {
            Ok(Observation::Applied(mut next)) => {
                next.apply_lazy_expiry(now, self.validity);
                next.check_invariants().map_err(AppError::Internal)?;
                if next.state != record.state {
                    info!(job_id = %record.id, from = %record.state, to = %next.state, "Job state changed");
                }
                *record = next;
            }
            Ok(Observation::Ignored) => {
                warn!(job_id = %record.id, state = %record.state, "Ignoring stale or unrecognized observation");
            }
            Err(e) => {
                warn!(job_id = %record.id, from = %e.from, to = %e.to, "Rejected state transition: {}", e.reason);
                return Err(inconsistent(&record.id, e));
            }
        }

        slot.generation.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }
}

fn inconsistent(id: &JobId, e: TransitionError) -> AppError {
    AppError::InconsistentState {
        job_id: id.clone(),
        from: e.from,
        to: e.to,
        reason: e.reason.to_string(),
    }
}
