use crate::config::{load_config, Config, PollPolicy};
use crate::error::{AppError, AppResult};
use crate::models::job::{JobId, JobRecord};
use crate::services::{
    AllowListManager, Artifact, ArtifactResolver, ExportApi, ExportRequest, ExportTransport, InputValidator, JobStore,
    JobSubmitter, LimiterStats, PollScheduler, Poller, RetentionService,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientStats {
    pub jobs_by_state: HashMap<String, usize>,
    pub active_polls: usize,
    pub requests: LimiterStats,
}

/// Result of [`ExportClient::list_jobs`]: every listed job that merged cleanly,
/// plus the records the store refused to merge.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobListing {
    pub jobs: Vec<JobRecord>,
    pub anomalies: Vec<AppError>,
}

/// Entry point tying the job store, submitter, poller, allow-list manager and
/// artifact resolver to one transport.
pub struct ExportClient {
    config: Config,
    api: Arc<ExportApi>,
    store: JobStore,
    submitter: JobSubmitter,
    poller: Arc<Poller>,
    scheduler: PollScheduler,
    allowlist: AllowListManager,
    resolver: ArtifactResolver,
    retention: RetentionService,
}

impl ExportClient {
    pub fn new(transport: Arc<dyn ExportTransport>, config: Config) -> Self {
        let api = Arc::new(ExportApi::new(transport, &config));
        let validator = Arc::new(InputValidator::new(config.artifact.require_https));
        if let Err(e) = config.validate() {
            warn!(error = %e, "Configuration has out-of-range values, affected settings use defaults");
        }
        let store = JobStore::new(config.artifact.validity());

        let submitter = JobSubmitter::new(api.clone(), store.clone(), validator.clone());
        let poller = Arc::new(Poller::new(api.clone(), store.clone(), validator.clone()));
        let scheduler = PollScheduler::new(poller.clone());
        let allowlist = AllowListManager::new(api.clone(), validator.clone(), &config.allowlist);
        let resolver = ArtifactResolver::new(validator, config.artifact.validity());
        let retention = RetentionService::new(store.clone(), &config.retention);

        info!(
            max_concurrent_requests = config.transport.max_concurrent_requests,
            "Export client initialized"
        );

        Self {
            config,
            api,
            store,
            submitter,
            poller,
            scheduler,
            allowlist,
            resolver,
            retention,
        }
    }

    /// Builds a client configured from `MAILEXPORT_*` environment variables.
    pub fn from_env(transport: Arc<dyn ExportTransport>) -> Self {
        Self::new(transport, load_config())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn submit(&self, request: ExportRequest) -> AppResult<JobRecord> {
        self.submitter.submit(request).await
    }

    pub async fn query_status(&self, id: &JobId) -> AppResult<JobRecord> {
        self.poller.query_status(id).await
    }

    /// Polls with `policy`, or the configured default policy if `None`.
    pub async fn await_completion(
        &self,
        id: &JobId,
        policy: Option<&PollPolicy>,
        cancel: &CancellationToken,
    ) -> AppResult<JobRecord> {
        let policy = policy.unwrap_or(&self.config.poll);
        self.poller.await_completion(id, policy, cancel).await
    }

    pub async fn submit_and_await(
        &self,
        request: ExportRequest,
        policy: Option<&PollPolicy>,
        cancel: &CancellationToken,
    ) -> AppResult<JobRecord> {
        let job = self.submit(request).await?;
        if job.is_terminal() {
            return Ok(job);
        }
        self.await_completion(&job.id, policy, cancel).await
    }

    /// Submits, waits, and resolves the result URL in one call.
    #[instrument(skip_all, fields(kind = %request.kind()))]
    pub async fn export_and_resolve(
        &self,
        request: ExportRequest,
        policy: Option<&PollPolicy>,
        cancel: &CancellationToken,
    ) -> AppResult<Artifact> {
        let job = self.submit_and_await(request, policy, cancel).await?;
        self.resolver.resolve(&job)
    }

    pub fn resolve(&self, job: &JobRecord) -> AppResult<Artifact> {
        self.resolver.resolve(job)
    }

    /// Local snapshot, no remote call.
    pub async fn job(&self, id: &JobId) -> Option<JobRecord> {
        self.store.get(id).await
    }

    /// Lists every export visible to the account, merging each into the store.
    /// A record that contradicts the stored state is reported in `anomalies`
    /// and does not stop the rest of the listing.
    #[instrument(skip(self))]
    pub async fn list_jobs(&self) -> AppResult<JobListing> {
        let transactional = self.api.list_exports().await?;
        let account = self.api.list_account_exports().await?;

        let now = Utc::now();
        let observed = transactional
            .into_iter()
            .map(|wire| wire.into_job(now))
            .chain(account.into_iter().map(|wire| wire.into_job(now)));

        let mut listing = JobListing::default();
        for job in observed {
            match self.store.upsert(job).await {
                Ok(record) => listing.jobs.push(record),
                Err(e) => {
                    warn!(error = %e, "Skipping listed job that conflicts with the stored record");
                    listing.anomalies.push(e);
                }
            }
        }
        listing.jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        info!(
            "Listed {} export jobs, {} anomalies",
            listing.jobs.len(),
            listing.anomalies.len()
        );
        Ok(listing)
    }

    pub fn allowlist(&self) -> &AllowListManager {
        &self.allowlist
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn retention(&self) -> &RetentionService {
        &self.retention
    }

    /// Spawns the periodic retention sweep if retention is enabled.
    pub fn start_retention(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.retention.enabled {
            return None;
        }
        let retention = self.retention.clone();
        Some(tokio::spawn(async move { retention.start_background_sweep(cancel).await }))
    }

    pub async fn stats(&self) -> ClientStats {
        ClientStats {
            jobs_by_state: self.store.stats().await,
            active_polls: self.scheduler.active_count().await,
            requests: self.api.limiter().stats(),
        }
    }

    /// Stops background polls. Jobs stay in the store.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
