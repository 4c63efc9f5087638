use crate::models::job::AccountExportId;
use crate::models::wire::RemoteErrorBody;
use async_trait::async_trait;
use std::fmt;

/// Remote operations the client knows how to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ExportActivity,
    ExportRejects,
    ExportAllowList,
    ExportInfo,
    ExportList,
    AllowListAdd,
    AllowListList,
    AllowListDelete,
    CreateAccountExport,
    ListAccountExports,
    AccountExport(AccountExportId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Endpoint {
    pub fn method(&self) -> Method {
        match self {
            Endpoint::ListAccountExports | Endpoint::AccountExport(_) => Method::Get,
            _ => Method::Post,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Endpoint::ExportActivity => "/exports/activity".to_string(),
            Endpoint::ExportRejects => "/exports/rejects".to_string(),
            Endpoint::ExportAllowList => "/exports/allowlist".to_string(),
            Endpoint::ExportInfo => "/exports/info".to_string(),
            Endpoint::ExportList => "/exports/list".to_string(),
            Endpoint::AllowListAdd => "/allowlists/add".to_string(),
            Endpoint::AllowListList => "/allowlists/list".to_string(),
            Endpoint::AllowListDelete => "/allowlists/delete".to_string(),
            Endpoint::CreateAccountExport | Endpoint::ListAccountExports => "/account-exports".to_string(),
            Endpoint::AccountExport(id) => format!("/account-exports/{id}"),
        }
    }

    /// Whether repeating the call can never create a second remote resource.
    pub fn is_idempotent(&self) -> bool {
        !matches!(
            self,
            Endpoint::ExportActivity
                | Endpoint::ExportRejects
                | Endpoint::ExportAllowList
                | Endpoint::CreateAccountExport
        )
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self.method() {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        write!(f, "{method} {}", self.path())
    }
}

/// Failure reported by the transport capability.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFailure {
    /// Connection-level failure; the request may or may not have been applied.
    Network(String),
    /// No response within the transport's deadline.
    Timeout(String),
    /// The remote answered with its uniform error body.
    Remote(RemoteErrorBody),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Network(msg) => write!(f, "network failure: {msg}"),
            TransportFailure::Timeout(msg) => write!(f, "timed out: {msg}"),
            TransportFailure::Remote(body) => write!(f, "remote error [{}]: {}", body.code, body.message),
        }
    }
}

/// Executes one request against the remote services. Authentication, base URLs
/// and HTTP encoding live behind this trait.
#[async_trait]
pub trait ExportTransport: Send + Sync {
    async fn perform(&self, endpoint: Endpoint, payload: serde_json::Value) -> Result<serde_json::Value, TransportFailure>;
}
