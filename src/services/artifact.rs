use crate::error::{AppError, AppResult, Operation};
use crate::models::job::{JobId, JobRecord, JobState};
use crate::services::validation::InputValidator;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// A downloadable export result. The URL is only usable until `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub job_id: JobId,
    pub url: Url,
    pub expires_at: DateTime<Utc>,
    pub size_in_bytes: Option<u64>,
}

pub struct ArtifactResolver {
    validator: Arc<InputValidator>,
    validity: Duration,
}

impl ArtifactResolver {
    pub fn new(validator: Arc<InputValidator>, validity: Duration) -> Self {
        Self { validator, validity }
    }

    pub fn resolve(&self, job: &JobRecord) -> AppResult<Artifact> {
        self.resolve_at(job, Utc::now())
    }

    /// Expiry is judged by `finished_at` and the validity window alone, so a
    /// job the remote still reports as complete can resolve as expired.
    pub fn resolve_at(&self, job: &JobRecord, now: DateTime<Utc>) -> AppResult<Artifact> {
        match job.state {
            JobState::Complete => {}
            JobState::Expired => {
                let expired_at = job
                    .artifact_expires_at(self.validity)
                    .filter(|at| *at <= now)
                    .unwrap_or(job.observed_at);
                return Err(AppError::ArtifactExpired {
                    job_id: job.id.clone(),
                    expired_at,
                });
            }
            ref state => {
                return Err(AppError::ArtifactNotReady {
                    job_id: job.id.clone(),
                    state: state.clone(),
                })
            }
        }

        let expires_at = job
            .artifact_expires_at(self.validity)
            .ok_or_else(|| AppError::Internal(format!("complete job {} has no finish time", job.id)))?;
        if now > expires_at {
            debug!(job_id = %job.id, %expires_at, "Artifact window elapsed");
            return Err(AppError::ArtifactExpired {
                job_id: job.id.clone(),
                expired_at: expires_at,
            });
        }

        let raw = job
            .result_url
            .as_deref()
            .ok_or_else(|| AppError::Internal(format!("complete job {} has no result URL", job.id)))?;
        let url = self.validator.validate_result_url(raw).map_err(|e| AppError::Decode {
            operation: Operation::ResolveArtifact,
            message: format!("job {} carries an unusable result URL: {e}", job.id),
        })?;

        Ok(Artifact {
            job_id: job.id.clone(),
            url,
            expires_at,
            size_in_bytes: job.size_in_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobKind, TransactionalJobId};

    fn complete_job(finished_days_ago: i64, now: DateTime<Utc>) -> JobRecord {
        let finished = now - Duration::days(finished_days_ago);
        JobRecord {
            id: JobId::Transactional(TransactionalJobId::new("job-1")),
            kind: JobKind::Activity,
            created_at: finished - Duration::minutes(5),
            finished_at: Some(finished),
            state: JobState::Complete,
            size_in_bytes: Some(2048),
            result_url: Some("https://downloads.example.com/job-1.zip".to_string()),
            observed_at: now,
            expired_locally: false,
        }
    }

    fn resolver() -> ArtifactResolver {
        ArtifactResolver::new(Arc::new(InputValidator::new(true)), Duration::days(90))
    }

    #[test]
    fn resolves_fresh_artifact() {
        let now = Utc::now();
        let artifact = resolver().resolve_at(&complete_job(1, now), now).unwrap();
        assert_eq!(artifact.url.as_str(), "https://downloads.example.com/job-1.zip");
        assert_eq!(artifact.size_in_bytes, Some(2048));
    }

    #[test]
    fn expires_after_validity_window_even_if_remote_says_complete() {
        let now = Utc::now();
        let err = resolver().resolve_at(&complete_job(91, now), now).unwrap_err();
        assert!(matches!(err, AppError::ArtifactExpired { .. }));
    }

    #[test]
    fn running_job_is_not_ready() {
        let now = Utc::now();
        let mut job = complete_job(0, now);
        job.state = JobState::Working;
        job.finished_at = None;
        job.result_url = None;
        let err = resolver().resolve_at(&job, now).unwrap_err();
        assert!(matches!(err, AppError::ArtifactNotReady { state: JobState::Working, .. }));
    }

    #[test]
    fn rejects_plain_http_urls_by_default() {
        let now = Utc::now();
        let mut job = complete_job(1, now);
        job.result_url = Some("http://downloads.example.com/job-1.zip".to_string());
        let err = resolver().resolve_at(&job, now).unwrap_err();
        assert_eq!(err.error_type(), "decode_error");
    }
}
