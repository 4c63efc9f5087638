use crate::error::{AppError, AppResult};
use crate::models::job::{JobKind, JobRecord};
use crate::models::wire::{wire_time, AccountExportRequest, ActivityExportRequest, NotifyExportRequest};
use crate::services::job_store::JobStore;
use crate::services::remote::ExportApi;
use crate::services::validation::InputValidator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Filters for an activity-history export. All are optional; messages matching
/// ANY value of a list are included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityExportParams {
    pub notify_email: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub senders: Vec<String>,
    pub states: Vec<String>,
    pub api_keys: Vec<String>,
}

impl ActivityExportParams {
    pub fn has_filters(&self) -> bool {
        self.date_from.is_some()
            || self.date_to.is_some()
            || !self.tags.is_empty()
            || !self.senders.is_empty()
            || !self.states.is_empty()
            || !self.api_keys.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountExportParams {
    pub include_stages: Vec<String>,
    /// ISO-8601; limits every stage except `audiences` to newer records.
    pub since_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportRequest {
    Activity(ActivityExportParams),
    Rejects { notify_email: Option<String> },
    AllowList { notify_email: Option<String> },
    Account(AccountExportParams),
}

impl ExportRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            ExportRequest::Activity(_) => JobKind::Activity,
            ExportRequest::Rejects { .. } => JobKind::Reject,
            ExportRequest::AllowList { .. } => JobKind::Allowlist,
            ExportRequest::Account(_) => JobKind::Account,
        }
    }
}

pub struct JobSubmitter {
    api: Arc<ExportApi>,
    store: JobStore,
    validator: Arc<InputValidator>,
}

impl JobSubmitter {
    pub fn new(api: Arc<ExportApi>, store: JobStore, validator: Arc<InputValidator>) -> Self {
        Self { api, store, validator }
    }

    /// Creates one remote export job and registers it in the store.
    ///
    /// Exactly one creation call is made. A transport failure is returned as is:
    /// the job may or may not exist remotely, and retrying could create it twice.
    #[instrument(skip(self, request), fields(kind = %request.kind()))]
    pub async fn submit(&self, request: ExportRequest) -> AppResult<JobRecord> {
        let requested_kind = request.kind();

        let job = match request {
            ExportRequest::Activity(params) => {
                let wire = self.activity_request(params)?;
                self.api.create_activity_export(&wire).await?.into_job(Utc::now())
            }
            ExportRequest::Rejects { notify_email } => {
                let wire = self.notify_request(notify_email)?;
                self.api.create_rejects_export(&wire).await?.into_job(Utc::now())
            }
            ExportRequest::AllowList { notify_email } => {
                let wire = self.notify_request(notify_email)?;
                self.api.create_allowlist_export(&wire).await?.into_job(Utc::now())
            }
            ExportRequest::Account(params) => {
                let wire = self.account_request(params)?;
                self.api.create_account_export(&wire).await?.into_job(Utc::now())
            }
        };

        if job.kind != requested_kind {
            warn!(job_id = %job.id, "Requested a {} export but the remote reported {}", requested_kind, job.kind);
        }
        if job.is_terminal() {
            warn!(job_id = %job.id, state = %job.state, "Export job was already terminal at creation");
        }

        let record = self.store.insert(job).await?;
        info!(job_id = %record.id, state = %record.state, "Submitted export job");
        Ok(record)
    }

    fn notify_request(&self, notify_email: Option<String>) -> AppResult<NotifyExportRequest> {
        if let Some(email) = &notify_email {
            self.validator.validate_email(email, "notify_email")?;
        }
        Ok(NotifyExportRequest {
            notify_email: notify_email.map(|e| e.trim().to_string()),
        })
    }

    fn activity_request(&self, params: ActivityExportParams) -> AppResult<ActivityExportRequest> {
        if let (Some(from), Some(to)) = (params.date_from, params.date_to) {
            if from > to {
                return Err(AppError::validation(
                    "date_from",
                    format!("start {from} is after end {to}"),
                ));
            }
        }

        self.validator.validate_filter_values(&params.tags, "tags")?;
        self.validator.validate_filter_values(&params.senders, "senders")?;
        self.validator.validate_filter_values(&params.states, "states")?;
        self.validator.validate_filter_values(&params.api_keys, "api_keys")?;

        if !params.has_filters() {
            warn!("Activity export requested without any filter; the full history will be exported");
        }

        let NotifyExportRequest { notify_email } = self.notify_request(params.notify_email)?;
        let non_empty = |values: Vec<String>| (!values.is_empty()).then_some(values);

        Ok(ActivityExportRequest {
            notify_email,
            date_from: params.date_from.as_ref().map(wire_time::format),
            date_to: params.date_to.as_ref().map(wire_time::format),
            tags: non_empty(params.tags),
            senders: non_empty(params.senders),
            states: non_empty(params.states),
            api_keys: non_empty(params.api_keys),
        })
    }

    fn account_request(&self, params: AccountExportParams) -> AppResult<AccountExportRequest> {
        if params.include_stages.is_empty() {
            return Err(AppError::validation("include_stages", "at least one stage is required"));
        }
        self.validator.validate_filter_values(&params.include_stages, "include_stages")?;

        let mut include_stages: Vec<String> = Vec::with_capacity(params.include_stages.len());
        for stage in params.include_stages {
            let stage = stage.trim().to_string();
            if !include_stages.contains(&stage) {
                include_stages.push(stage);
            }
        }

        let since_timestamp = match params.since_timestamp {
            Some(raw) => {
                let parsed = self.validator.parse_timestamp(&raw, "since_timestamp")?;
                Some(parsed.to_rfc3339())
            }
            None => None,
        };

        Ok(AccountExportRequest {
            include_stages,
            since_timestamp,
        })
    }
}
