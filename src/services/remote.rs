use crate::config::{Config, RetryConfig};
use crate::error::{AppError, AppResult, Operation};
use crate::models::job::AccountExportId;
use crate::models::wire::{
    AccountExportRequest, AccountExportWire, AccountExportsPage, ActivityExportRequest, AllowListAddRequest,
    AllowListAddResponse, AllowListDeleteRequest, AllowListDeleteResponse, AllowListEntryWire, AllowListQuery,
    ExportInfoRequest, ExportJobWire, NotifyExportRequest, PageQuery, RemoteErrorBody,
};
use crate::services::limiter::RequestLimiter;
use crate::services::retry::retry_with_backoff;
use crate::services::transport::{Endpoint, ExportTransport, TransportFailure};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

const NOT_FOUND_CODES: &[&str] = &["404", "Unknown_Export", "Unknown_Allowlist", "ResourceNotFound"];
const INPUT_CODES: &[&str] = &["400", "401", "403", "422", "-1", "ValidationError", "Invalid_Key", "Invalid_Email"];
const TRANSIENT_CODES: &[&str] = &["429", "500", "502", "503", "504", "GeneralError", "TooManyRequests"];

/// Typed access to the remote export and allow-list endpoints.
pub struct ExportApi {
    transport: Arc<dyn ExportTransport>,
    limiter: RequestLimiter,
    retry: RetryConfig,
    request_timeout: Duration,
    page_size: u32,
}

impl ExportApi {
    pub fn new(transport: Arc<dyn ExportTransport>, config: &Config) -> Self {
        Self {
            transport,
            limiter: RequestLimiter::new(config.transport.max_concurrent_requests),
            retry: config.retry.clone(),
            request_timeout: config.transport.request_timeout,
            page_size: config.account_exports.page_size,
        }
    }

    pub fn limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    /// Performs one remote call, without retries.
    async fn call<Req, Resp>(&self, endpoint: Endpoint, payload: &Req, operation: Operation) -> AppResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!("remote_call", %request_id, endpoint = %endpoint, operation = %operation);

        async {
            let body = serde_json::to_value(payload)
                .map_err(|e| AppError::Internal(format!("Failed to encode {endpoint} payload: {e}")))?;

            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|e| AppError::Internal(format!("Failed to acquire request permit: {e}")))?;

            debug!("Sending request");
            let response = match timeout(self.request_timeout, self.transport.perform(endpoint.clone(), body)).await {
                Ok(Ok(value)) => value,
                Ok(Err(failure)) => {
                    warn!("Request failed: {}", failure);
                    return Err(map_failure(failure, operation));
                }
                Err(_) => {
                    warn!("Request timed out after {:?}", self.request_timeout);
                    return Err(AppError::Transport {
                        operation,
                        job_id: None,
                        cause: format!("{endpoint} timed out after {:?}", self.request_timeout),
                    });
                }
            };

            serde_json::from_value(response).map_err(|e| AppError::Decode {
                operation,
                message: format!("{endpoint} returned an unexpected body: {e}"),
            })
        }
        .instrument(span)
        .await
    }

    /// Performs a call that is safe to repeat, retrying transport failures.
    async fn call_repeatable<Req, Resp>(&self, endpoint: Endpoint, payload: &Req, operation: Operation) -> AppResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        debug_assert!(endpoint.is_idempotent());
        let name = format!("{operation} via {endpoint}");
        retry_with_backoff(|| self.call(endpoint.clone(), payload, operation), &self.retry, &name).await
    }

    // Creation calls are never retried: a lost response may still have created the job.

    pub async fn create_activity_export(&self, request: &ActivityExportRequest) -> AppResult<ExportJobWire> {
        self.call(Endpoint::ExportActivity, request, Operation::SubmitExport).await
    }

    pub async fn create_rejects_export(&self, request: &NotifyExportRequest) -> AppResult<ExportJobWire> {
        self.call(Endpoint::ExportRejects, request, Operation::SubmitExport).await
    }

    pub async fn create_allowlist_export(&self, request: &NotifyExportRequest) -> AppResult<ExportJobWire> {
        self.call(Endpoint::ExportAllowList, request, Operation::SubmitExport).await
    }

    pub async fn create_account_export(&self, request: &AccountExportRequest) -> AppResult<AccountExportWire> {
        self.call(Endpoint::CreateAccountExport, request, Operation::SubmitExport).await
    }

    pub async fn export_info(&self, id: &str) -> AppResult<ExportJobWire> {
        let request = ExportInfoRequest { id: id.to_string() };
        self.call_repeatable(Endpoint::ExportInfo, &request, Operation::QueryStatus).await
    }

    pub async fn account_export(&self, id: AccountExportId) -> AppResult<AccountExportWire> {
        self.call_repeatable(Endpoint::AccountExport(id), &serde_json::json!({}), Operation::QueryStatus)
            .await
    }

    pub async fn list_exports(&self) -> AppResult<Vec<ExportJobWire>> {
        self.call_repeatable(Endpoint::ExportList, &serde_json::json!({}), Operation::ListJobs)
            .await
    }

    /// Fetches every page of account exports; `total_items` is authoritative.
    pub async fn list_account_exports(&self) -> AppResult<Vec<AccountExportWire>> {
        let mut exports = Vec::new();
        let mut offset = 0u64;

        loop {
            let query = PageQuery {
                count: self.page_size,
                offset,
            };
            let page: AccountExportsPage = self
                .call_repeatable(Endpoint::ListAccountExports, &query, Operation::ListJobs)
                .await?;

            let received = page.exports.len() as u64;
            exports.extend(page.exports);
            offset += received;

            debug!("Fetched {} of {} account exports", exports.len(), page.total_items);
            if received == 0 || offset >= page.total_items {
                break;
            }
        }

        Ok(exports)
    }

    pub async fn allowlist_add(&self, request: &AllowListAddRequest) -> AppResult<AllowListAddResponse> {
        self.call_repeatable(Endpoint::AllowListAdd, request, Operation::AllowListAdd).await
    }

    pub async fn allowlist_delete(&self, request: &AllowListDeleteRequest) -> AppResult<AllowListDeleteResponse> {
        self.call_repeatable(Endpoint::AllowListDelete, request, Operation::AllowListRemove)
            .await
    }

    pub async fn allowlist_list(&self, query: &AllowListQuery) -> AppResult<Vec<AllowListEntryWire>> {
        self.call_repeatable(Endpoint::AllowListList, query, Operation::AllowListList).await
    }
}

/// Maps a transport failure onto the client error taxonomy.
pub fn map_failure(failure: TransportFailure, operation: Operation) -> AppError {
    match failure {
        TransportFailure::Network(cause) | TransportFailure::Timeout(cause) => AppError::Transport {
            operation,
            job_id: None,
            cause,
        },
        TransportFailure::Remote(body) => map_remote_error(body, operation),
    }
}

fn map_remote_error(body: RemoteErrorBody, operation: Operation) -> AppError {
    let code = body.code.as_str();
    if NOT_FOUND_CODES.contains(&code) {
        AppError::NotFound {
            operation,
            job_id: None,
            message: body.message,
        }
    } else if INPUT_CODES.contains(&code) {
        AppError::rejected(operation, "request", format!("[{}] {}", body.code, body.message))
    } else if TRANSIENT_CODES.contains(&code) {
        AppError::Transport {
            operation,
            job_id: None,
            cause: format!("remote reported [{}] {}", body.code, body.message),
        }
    } else {
        AppError::Remote {
            operation,
            job_id: None,
            code: body.code,
            message: body.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: &str) -> RemoteErrorBody {
        RemoteErrorBody {
            code: code.into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn maps_remote_codes_to_taxonomy() {
        assert!(matches!(
            map_remote_error(body("Unknown_Export"), Operation::QueryStatus),
            AppError::NotFound { .. }
        ));
        assert!(matches!(
            map_remote_error(body("ValidationError"), Operation::SubmitExport),
            AppError::Validation { operation: Some(Operation::SubmitExport), ref field, .. } if field == "request"
        ));
        assert!(matches!(
            map_remote_error(body("503"), Operation::QueryStatus),
            AppError::Transport { .. }
        ));
        assert!(matches!(
            map_remote_error(body("PaymentRequired"), Operation::SubmitExport),
            AppError::Remote { .. }
        ));
    }

    #[test]
    fn network_failures_become_transport_errors() {
        let err = map_failure(TransportFailure::Timeout("deadline".into()), Operation::ListJobs);
        assert_eq!(err.error_type(), "transport_error");
    }
}
