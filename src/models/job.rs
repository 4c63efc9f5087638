use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Days a completed export's download URL stays valid after it finishes.
pub const ARTIFACT_VALIDITY_DAYS: i64 = 90;

/// Identifier of a transactional export job (activity, reject, allowlist).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionalJobId(String);

impl TransactionalJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionalJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a marketing account export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountExportId(u64);

impl AccountExportId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AccountExportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a job in the store. The two identifier spaces never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobId {
    Account(AccountExportId),
    Transactional(TransactionalJobId),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Transactional(id) => write!(f, "transactional:{id}"),
            JobId::Account(id) => write!(f, "account:{id}"),
        }
    }
}

impl From<TransactionalJobId> for JobId {
    fn from(id: TransactionalJobId) -> Self {
        JobId::Transactional(id)
    }
}

impl From<AccountExportId> for JobId {
    fn from(id: AccountExportId) -> Self {
        JobId::Account(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Activity,
    Reject,
    #[serde(alias = "whitelist")]
    Allowlist,
    Account,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Activity => "activity",
            JobKind::Reject => "reject",
            JobKind::Allowlist => "allowlist",
            JobKind::Account => "account",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote-reported job state. Unrecognized tags are kept verbatim in `Unknown`
/// and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobState {
    Waiting,
    Working,
    Complete,
    Error,
    Expired,
    Unknown(String),
}

impl JobState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "waiting" => JobState::Waiting,
            "working" => JobState::Working,
            "complete" => JobState::Complete,
            "error" => JobState::Error,
            "expired" => JobState::Expired,
            _ => JobState::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Working => "working",
            JobState::Complete => "complete",
            JobState::Error => "error",
            JobState::Expired => "expired",
            JobState::Unknown(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Error | JobState::Expired)
    }

    /// Whether a record in `self` may move to `next` on a new observation.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;

        if self == next {
            return true;
        }

        match (self, next) {
            (Waiting, Working | Complete | Error | Expired | Unknown(_)) => true,
            (Working, Complete | Error | Expired | Unknown(_)) => true,
            (Unknown(_), _) => true,
            (Complete, Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(JobState::parse(&raw))
    }
}

/// A rejected state change, reported by the store as an inconsistency.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
    pub reason: &'static str,
}

/// Outcome of merging a fresh remote observation into a known record.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Applied(ExportJob),
    /// The observation carries no usable information for a record in this state.
    Ignored,
}

/// An export job as last observed. Remote responses decode straight into this
/// type; there is no separate response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportJob {
    pub id: JobId,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub size_in_bytes: Option<u64>,
    pub result_url: Option<String>,
    pub observed_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) expired_locally: bool,
}

pub type JobRecord = ExportJob;

impl ExportJob {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Instant after which the result URL must no longer be handed out.
    pub fn artifact_expires_at(&self, validity: Duration) -> Option<DateTime<Utc>> {
        self.finished_at.map(|finished| finished + validity)
    }

    pub fn artifact_window_elapsed(&self, now: DateTime<Utc>, validity: Duration) -> bool {
        match self.artifact_expires_at(validity) {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }

    /// Applies the time-driven `complete -> expired` transition. Returns true if
    /// the record changed.
    pub fn apply_lazy_expiry(&mut self, now: DateTime<Utc>, validity: Duration) -> bool {
        if self.state == JobState::Complete && self.artifact_window_elapsed(now, validity) {
            self.state = JobState::Expired;
            self.result_url = None;
            self.expired_locally = true;
            return true;
        }
        false
    }

    /// Normalizes a first observation so it satisfies the record invariants.
    pub fn settle(mut self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        if self.state.is_terminal() {
            if self.finished_at.is_none() {
                self.finished_at = Some(now);
            }
        } else {
            self.finished_at = None;
        }

        match self.state {
            JobState::Complete if self.result_url.is_none() => {
                return Err(TransitionError {
                    from: self.state.clone(),
                    to: self.state.clone(),
                    reason: "complete job reported without a result url",
                });
            }
            JobState::Complete => {}
            _ => self.result_url = None,
        }

        self.observed_at = now;
        Ok(self)
    }

    /// Merges a fresh observation of the same job into this record, enforcing the
    /// state machine. Identity fields (`id`, `kind`, `created_at`) never change and
    /// `finished_at` is set exactly once.
    pub fn observe(&self, observed: ExportJob, now: DateTime<Utc>) -> Result<Observation, TransitionError> {
        let from = &self.state;
        let to = &observed.state;

        if from.is_terminal() && matches!(to, JobState::Unknown(_)) {
            return Ok(Observation::Ignored);
        }
        if *from == JobState::Expired && *to == JobState::Complete && self.expired_locally {
            return Ok(Observation::Ignored);
        }
        if !from.can_transition_to(to) {
            return Err(TransitionError {
                from: from.clone(),
                to: to.clone(),
                reason: "transition not allowed by the export job state machine",
            });
        }
        if *to == JobState::Complete && observed.result_url.is_none() {
            return Err(TransitionError {
                from: from.clone(),
                to: to.clone(),
                reason: "complete job reported without a result url",
            });
        }

        let finished_at = if !to.is_terminal() {
            None
        } else if from.is_terminal() {
            self.finished_at
        } else {
            observed.finished_at.or(Some(now))
        };

        let result_url = match to {
            JobState::Complete => observed.result_url,
            _ => None,
        };
        let expired_locally = self.expired_locally && *to == JobState::Expired && *from == JobState::Expired;

        Ok(Observation::Applied(ExportJob {
            id: self.id.clone(),
            kind: self.kind,
            created_at: self.created_at,
            finished_at,
            state: observed.state,
            size_in_bytes: observed.size_in_bytes.or(self.size_in_bytes),
            result_url,
            observed_at: now,
            expired_locally,
        }))
    }

    /// Checks the record invariants: `finished_at` iff terminal, `result_url` only
    /// when complete.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.finished_at.is_some() != self.is_terminal() {
            return Err(format!(
                "job {} in state {} has finished_at = {:?}",
                self.id, self.state, self.finished_at
            ));
        }
        if self.result_url.is_some() && self.state != JobState::Complete {
            return Err(format!("job {} in state {} carries a result url", self.id, self.state));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(state: JobState) -> ExportJob {
        let now = Utc::now();
        ExportJob {
            id: JobId::Transactional(TransactionalJobId::new("exp-1")),
            kind: JobKind::Activity,
            created_at: now,
            finished_at: None,
            state,
            size_in_bytes: None,
            result_url: None,
            observed_at: now,
            expired_locally: false,
        }
    }

    fn complete(url: &str) -> ExportJob {
        let mut j = job(JobState::Complete);
        j.result_url = Some(url.to_string());
        j
    }

    #[test]
    fn parses_known_and_unknown_states() {
        assert_eq!(JobState::parse("working"), JobState::Working);
        assert_eq!(JobState::parse(" Complete "), JobState::Complete);
        assert_eq!(JobState::parse("archived"), JobState::Unknown("archived".into()));
        assert!(!JobState::parse("archived").is_terminal());
    }

    #[test]
    fn state_round_trips_through_json() {
        let state: JobState = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(state, JobState::Unknown("queued".into()));
        assert_eq!(serde_json::to_string(&state).unwrap(), "\"queued\"");
    }

    #[test]
    fn job_kind_accepts_legacy_whitelist_tag() {
        let kind: JobKind = serde_json::from_str("\"whitelist\"").unwrap();
        assert_eq!(kind, JobKind::Allowlist);
    }

    #[test]
    fn identifier_spaces_stay_disjoint() {
        let account: JobId = serde_json::from_str("42").unwrap();
        let transactional: JobId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(account, JobId::Account(AccountExportId::new(42)));
        assert_eq!(transactional, JobId::Transactional(TransactionalJobId::new("42")));
        assert_ne!(account, transactional);
    }

    #[test]
    fn transition_table() {
        use JobState::*;
        assert!(Waiting.can_transition_to(&Working));
        assert!(Working.can_transition_to(&Complete));
        assert!(Working.can_transition_to(&Error));
        assert!(Complete.can_transition_to(&Expired));
        assert!(!Complete.can_transition_to(&Working));
        assert!(!Working.can_transition_to(&Waiting));
        assert!(!Error.can_transition_to(&Complete));
        assert!(!Expired.can_transition_to(&Complete));
    }

    #[test]
    fn settle_enforces_invariants() {
        let now = Utc::now();
        let mut working = job(JobState::Working);
        working.finished_at = Some(now);
        working.result_url = Some("https://example.com/a.zip".into());
        let settled = working.settle(now).unwrap();
        assert!(settled.finished_at.is_none());
        assert!(settled.result_url.is_none());
        settled.check_invariants().unwrap();

        let errored = job(JobState::Error).settle(now).unwrap();
        assert_eq!(errored.finished_at, Some(now));
        errored.check_invariants().unwrap();

        assert!(job(JobState::Complete).settle(now).is_err());
    }

    #[test]
    fn finished_at_is_set_once_on_entering_terminal() {
        let now = Utc::now();
        let working = job(JobState::Working);
        let remote_finish = now - Duration::minutes(5);

        let mut observed = complete("https://example.com/a.zip");
        observed.finished_at = Some(remote_finish);
        let Observation::Applied(done) = working.observe(observed, now).unwrap() else {
            panic!("expected applied observation");
        };
        assert_eq!(done.finished_at, Some(remote_finish));
        done.check_invariants().unwrap();

        let mut again = complete("https://example.com/a.zip");
        again.finished_at = Some(now);
        let Observation::Applied(same) = done.observe(again, now).unwrap() else {
            panic!("expected applied observation");
        };
        assert_eq!(same.finished_at, Some(remote_finish));
    }

    #[test]
    fn rejects_regression_from_complete() {
        let now = Utc::now();
        let done = complete("https://example.com/a.zip").settle(now).unwrap();
        let err = done.observe(job(JobState::Working), now).unwrap_err();
        assert_eq!(err.from, JobState::Complete);
        assert_eq!(err.to, JobState::Working);
    }

    #[test]
    fn complete_without_url_is_inconsistent() {
        let now = Utc::now();
        let err = job(JobState::Working).observe(job(JobState::Complete), now).unwrap_err();
        assert_eq!(err.to, JobState::Complete);
    }

    #[test]
    fn unknown_state_after_terminal_is_ignored() {
        let now = Utc::now();
        let errored = job(JobState::Error).settle(now).unwrap();
        let outcome = errored.observe(job(JobState::Unknown("archived".into())), now).unwrap();
        assert_eq!(outcome, Observation::Ignored);
    }

    #[test]
    fn lazy_expiry_after_validity_window() {
        let now = Utc::now();
        let validity = Duration::days(ARTIFACT_VALIDITY_DAYS);
        let mut done = complete("https://example.com/a.zip");
        done.finished_at = Some(now - Duration::days(91));

        assert!(done.apply_lazy_expiry(now, validity));
        assert_eq!(done.state, JobState::Expired);
        assert!(done.result_url.is_none());
        done.check_invariants().unwrap();

        // A stale remote "complete" does not resurrect a locally expired job.
        let outcome = done.observe(complete("https://example.com/a.zip"), now).unwrap();
        assert_eq!(outcome, Observation::Ignored);
    }

    #[test]
    fn lazy_expiry_keeps_fresh_artifacts() {
        let now = Utc::now();
        let mut done = complete("https://example.com/a.zip");
        done.finished_at = Some(now - Duration::days(89));
        assert!(!done.apply_lazy_expiry(now, Duration::days(ARTIFACT_VALIDITY_DAYS)));
        assert_eq!(done.state, JobState::Complete);
    }
}
