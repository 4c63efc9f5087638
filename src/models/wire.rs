//! Fixed request/response shapes exchanged with the remote email services.
//!
//! Transactional endpoints speak `exports/*` and `allowlists/*`; the marketing
//! platform speaks `account-exports`. Authentication is added by the transport
//! and never appears here.

use crate::models::allowlist::AllowListEntry;
use crate::models::job::{AccountExportId, ExportJob, JobId, JobKind, JobState, TransactionalJobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Timestamp handling for wire fields. Transactional timestamps arrive as
/// `YYYY-MM-DD HH:MM:SS` UTC strings, marketing ones as RFC 3339.
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const TRANSACTIONAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, TRANSACTIONAL_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.format(TRANSACTIONAL_FORMAT).to_string()
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw {
                None => Ok(None),
                Some(s) if s.trim().is_empty() => Ok(None),
                Some(s) => parse(&s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
            }
        }
    }

    pub mod required {
        use super::*;

        pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&value.to_rfc3339())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
            let raw = String::deserialize(deserializer)?;
            parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
        }
    }
}

/// Uniform remote error body. Some endpoints send numeric codes, some strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteErrorBody {
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    pub message: String,
}

fn code_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => "unknown".to_string(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiLink {
    #[serde(default)]
    pub rel: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, rename = "targetSchema")]
    pub target_schema: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
}

// Transactional exports

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJobWire {
    pub id: String,
    #[serde(default, with = "wire_time::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub kind: JobKind,
    #[serde(default, with = "wire_time::option")]
    pub finished_at: Option<DateTime<Utc>>,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
}

impl ExportJobWire {
    pub fn into_job(self, now: DateTime<Utc>) -> ExportJob {
        ExportJob {
            id: JobId::Transactional(TransactionalJobId::new(self.id)),
            kind: self.kind,
            created_at: self.created_at.unwrap_or(now),
            finished_at: self.finished_at,
            state: self.state,
            size_in_bytes: None,
            result_url: self.result_url.filter(|url| !url.trim().is_empty()),
            observed_at: now,
            expired_locally: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityExportRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub senders: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub states: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_keys: Option<Vec<String>>,
}

/// Body of the reject-list and allow-list export triggers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyExportRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportInfoRequest {
    pub id: String,
}

// Marketing account exports

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountExportWire {
    pub export_id: u64,
    #[serde(default, with = "wire_time::option")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, with = "wire_time::option")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size_in_bytes: Option<u64>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default, rename = "_links")]
    pub links: Vec<ApiLink>,
}

impl AccountExportWire {
    /// Account exports carry no state in the base schema; an explicit state
    /// wins, otherwise it is derived from `finished` and `download_url`.
    pub fn derived_state(&self) -> JobState {
        if let Some(state) = &self.state {
            return state.clone();
        }
        let has_url = self.download_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        match (self.finished.is_some(), has_url) {
            (true, true) => JobState::Complete,
            (true, false) => JobState::Error,
            (false, _) => JobState::Working,
        }
    }

    pub fn into_job(self, now: DateTime<Utc>) -> ExportJob {
        let state = self.derived_state();
        ExportJob {
            id: JobId::Account(AccountExportId::new(self.export_id)),
            kind: JobKind::Account,
            created_at: self.started.unwrap_or(now),
            finished_at: self.finished,
            state,
            size_in_bytes: self.size_in_bytes,
            result_url: self.download_url.filter(|url| !url.trim().is_empty()),
            observed_at: now,
            expired_locally: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountExportsPage {
    #[serde(default)]
    pub exports: Vec<AccountExportWire>,
    pub total_items: u64,
    #[serde(default, rename = "_links")]
    pub links: Vec<ApiLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountExportRequest {
    pub include_stages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageQuery {
    pub count: u32,
    pub offset: u64,
}

// Allow-lists

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowListAddRequest {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowListAddResponse {
    pub email: String,
    pub added: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowListEntryWire {
    pub email: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(with = "wire_time::required")]
    pub created_at: DateTime<Utc>,
}

impl From<AllowListEntryWire> for AllowListEntry {
    fn from(wire: AllowListEntryWire) -> Self {
        Self {
            email: wire.email,
            detail: wire.detail.filter(|d| !d.is_empty()),
            created_at: wire.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowListDeleteRequest {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowListDeleteResponse {
    pub email: String,
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_transactional_job_with_space_separated_timestamps() {
        let wire: ExportJobWire = serde_json::from_value(json!({
            "id": "abc123",
            "created_at": "2024-03-01 10:00:00",
            "type": "activity",
            "finished_at": "",
            "state": "working"
        }))
        .unwrap();

        assert_eq!(wire.finished_at, None);
        assert_eq!(wire.created_at.unwrap().to_rfc3339(), "2024-03-01T10:00:00+00:00");

        let job = wire.into_job(Utc::now());
        assert_eq!(job.id, JobId::Transactional(TransactionalJobId::new("abc123")));
        assert_eq!(job.state, JobState::Working);
    }

    #[test]
    fn decodes_rfc3339_and_unknown_state() {
        let wire: ExportJobWire = serde_json::from_value(json!({
            "id": "x",
            "created_at": "2019-08-24T14:15:22Z",
            "type": "reject",
            "state": "paused"
        }))
        .unwrap();
        assert_eq!(wire.state, JobState::Unknown("paused".into()));
    }

    #[test]
    fn activity_request_omits_absent_filters() {
        let req = ActivityExportRequest {
            tags: Some(vec!["promo".into()]),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({ "tags": ["promo"] }));
    }

    #[test]
    fn account_export_state_derivation() {
        let mut wire: AccountExportWire = serde_json::from_value(json!({
            "export_id": 7,
            "started": "2019-08-24T14:15:22Z",
            "size_in_bytes": 1024
        }))
        .unwrap();
        assert_eq!(wire.derived_state(), JobState::Working);

        wire.finished = Some(Utc::now());
        assert_eq!(wire.derived_state(), JobState::Error);

        wire.download_url = Some("https://downloads.example.com/7.zip".into());
        assert_eq!(wire.derived_state(), JobState::Complete);

        wire.state = Some(JobState::Expired);
        assert_eq!(wire.derived_state(), JobState::Expired);

        let job = wire.into_job(Utc::now());
        assert_eq!(job.id, JobId::Account(AccountExportId::new(7)));
        assert_eq!(job.size_in_bytes, Some(1024));
    }

    #[test]
    fn remote_error_accepts_numeric_codes() {
        let body: RemoteErrorBody = serde_json::from_value(json!({ "code": -1, "message": "Invalid API key" })).unwrap();
        assert_eq!(body.code, "-1");
    }

    #[test]
    fn formats_activity_dates_for_the_wire() {
        let dt = wire_time::parse("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(wire_time::format(&dt), "2024-01-02 03:04:05");
    }
}
