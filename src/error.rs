use crate::models::job::{JobId, JobState};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The client operation an error arose in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SubmitExport,
    QueryStatus,
    ListJobs,
    ResolveArtifact,
    AllowListAdd,
    AllowListRemove,
    AllowListList,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SubmitExport => "submit_export",
            Operation::QueryStatus => "query_status",
            Operation::ListJobs => "list_jobs",
            Operation::ResolveArtifact => "resolve_artifact",
            Operation::AllowListAdd => "allowlist_add",
            Operation::AllowListRemove => "allowlist_remove",
            Operation::AllowListList => "allowlist_list",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Transient; asking again later may succeed.
    RetryLater,
    /// The request itself is wrong.
    FixInput,
    /// Will never succeed as-is.
    Permanent,
    /// The caller gave up.
    Aborted,
}

fn job_suffix(job_id: &Option<JobId>) -> String {
    match job_id {
        Some(id) => format!(" (job {id})"),
        None => String::new(),
    }
}

fn operation_suffix(operation: &Option<Operation>) -> String {
    match operation {
        Some(op) => format!(" during {op}"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppError {
    /// `operation` is set when the remote rejected the input; local checks
    /// leave it empty.
    #[error("Validation error{} on {field}: {message}", operation_suffix(.operation))]
    Validation {
        operation: Option<Operation>,
        field: String,
        message: String,
    },

    #[error("Transport error during {operation}{}: {cause}", job_suffix(.job_id))]
    Transport {
        operation: Operation,
        job_id: Option<JobId>,
        cause: String,
    },

    #[error("Remote error during {operation}{}: [{code}] {message}", job_suffix(.job_id))]
    Remote {
        operation: Operation,
        job_id: Option<JobId>,
        code: String,
        message: String,
    },

    #[error("Not found during {operation}{}: {message}", job_suffix(.job_id))]
    NotFound {
        operation: Operation,
        job_id: Option<JobId>,
        message: String,
    },

    #[error("Undecodable response during {operation}: {message}")]
    Decode { operation: Operation, message: String },

    #[error("Inconsistent state for job {job_id}: {from} -> {to} ({reason})")]
    InconsistentState {
        job_id: JobId,
        from: JobState,
        to: JobState,
        reason: String,
    },

    #[error("Polling job {job_id} timed out after {waited:?} in state {last_state}")]
    PollTimeout {
        job_id: JobId,
        waited: Duration,
        last_state: JobState,
    },

    #[error("Polling job {job_id} cancelled in state {last_state}")]
    Cancelled { job_id: JobId, last_state: JobState },

    #[error("Artifact for job {job_id} not ready: job is {state}")]
    ArtifactNotReady { job_id: JobId, state: JobState },

    #[error("Artifact for job {job_id} expired at {expired_at}")]
    ArtifactExpired {
        job_id: JobId,
        expired_at: DateTime<Utc>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            operation: None,
            field: field.into(),
            message: message.into(),
        }
    }

    /// Input rejected by the remote service while running `operation`.
    pub fn rejected(operation: Operation, field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            operation: Some(operation),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        match self {
            AppError::Validation { operation, .. } => *operation,
            AppError::Transport { operation, .. }
            | AppError::Remote { operation, .. }
            | AppError::NotFound { operation, .. }
            | AppError::Decode { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::Transport { .. } => "transport_error",
            AppError::Remote { .. } => "remote_error",
            AppError::NotFound { .. } => "not_found",
            AppError::Decode { .. } => "decode_error",
            AppError::InconsistentState { .. } => "inconsistent_state",
            AppError::PollTimeout { .. } => "poll_timeout",
            AppError::Cancelled { .. } => "cancelled",
            AppError::ArtifactNotReady { .. } => "artifact_not_ready",
            AppError::ArtifactExpired { .. } => "artifact_expired",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            AppError::ArtifactNotReady { state, .. } if state.is_terminal() => ErrorDisposition::Permanent,
            AppError::Transport { .. } | AppError::PollTimeout { .. } | AppError::ArtifactNotReady { .. } => {
                ErrorDisposition::RetryLater
            }
            AppError::Validation { .. } | AppError::NotFound { .. } => ErrorDisposition::FixInput,
            AppError::Remote { .. }
            | AppError::Decode { .. }
            | AppError::InconsistentState { .. }
            | AppError::ArtifactExpired { .. }
            | AppError::Internal(_) => ErrorDisposition::Permanent,
            AppError::Cancelled { .. } => ErrorDisposition::Aborted,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            AppError::Transport { job_id, .. }
            | AppError::Remote { job_id, .. }
            | AppError::NotFound { job_id, .. } => job_id.as_ref(),
            AppError::InconsistentState { job_id, .. }
            | AppError::PollTimeout { job_id, .. }
            | AppError::Cancelled { job_id, .. }
            | AppError::ArtifactNotReady { job_id, .. }
            | AppError::ArtifactExpired { job_id, .. } => Some(job_id),
            AppError::Validation { .. } | AppError::Decode { .. } | AppError::Internal(_) => None,
        }
    }

    /// Attaches a job id to errors raised below the layer that knows it.
    pub fn with_job(self, id: &JobId) -> Self {
        match self {
            AppError::Transport { operation, cause, .. } => AppError::Transport {
                operation,
                job_id: Some(id.clone()),
                cause,
            },
            AppError::Remote { operation, code, message, .. } => AppError::Remote {
                operation,
                job_id: Some(id.clone()),
                code,
                message,
            },
            AppError::NotFound { operation, message, .. } => AppError::NotFound {
                operation,
                job_id: Some(id.clone()),
                message,
            },
            other => other,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
