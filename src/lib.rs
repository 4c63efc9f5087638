pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use client::{ClientStats, ExportClient, JobListing};
pub use config::{load_config, Config, PollPolicy};
pub use error::{AppError, AppResult, ErrorDisposition, Operation};
pub use logging::init_logging;
pub use models::{
    AccountExportId, AllowListAddition, AllowListEntry, AllowListRemoval, ExportJob, JobId, JobKind, JobRecord,
    JobState, TransactionalJobId,
};
pub use services::{
    AccountExportParams, ActivityExportParams, Artifact, Endpoint, ExportRequest, ExportTransport, TransportFailure,
};
